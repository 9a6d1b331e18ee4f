//! Identifier generation for items and log entries
//!
//! IDs are `<prefix><millis>-<seq>` in base36. The sequence is process-wide
//! and mixed with the process id, so two processes writing the same file in
//! the same millisecond still produce distinct IDs.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a new id stamped with `now`
pub fn generate_id(prefix: &str, now: DateTime<Utc>) -> String {
    let millis = now.timestamp_millis().max(0) as u64;
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let salted = seq ^ (u64::from(std::process::id()) << 32);
    format!("{}{}-{}", prefix, to_base36(millis), to_base36(salted))
}

fn to_base36(mut value: u64) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut chars = Vec::new();
    while value > 0 {
        chars.push(ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    chars.iter().rev().collect()
}
