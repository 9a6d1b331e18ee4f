//! Lenient readers over untrusted JSON objects
//!
//! Each reader looks up one named key and returns `None` when the value is
//! missing or has the wrong shape, so callers can fall back per field.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

pub fn get_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)?.as_str()
}

pub fn get_array<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Vec<Value>> {
    obj.get(key)?.as_array()
}

pub fn get_object<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    obj.get(key)?.as_object()
}

/// Signed integer; finite floats are truncated
pub fn get_i64(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    let value = obj.get(key)?;
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)
}

/// Non-negative integer; negative values read as missing
pub fn get_u64(obj: &Map<String, Value>, key: &str) -> Option<u64> {
    let value = obj.get(key)?;
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    value
        .as_f64()
        .filter(|f| f.is_finite() && *f >= 0.0)
        .map(|f| f as u64)
}

/// Epoch milliseconds as a number or numeric string, or an RFC 3339 string
pub fn get_timestamp(obj: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    match obj.get(key)? {
        Value::Number(_) => DateTime::from_timestamp_millis(get_i64(obj, key)?),
        Value::String(s) => parse_timestamp(s),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(millis) = s.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis);
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
