//! Token estimation for context items
//!
//! Character-count heuristic with a tighter ratio for symbol-dense text
//! (source code, JSON, stack traces), which tokenizes into more pieces per
//! character than prose.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Approximate characters per token for prose
pub const CHARS_PER_TOKEN: usize = 4;

/// Approximate characters per token for symbol-dense text
pub const DENSE_CHARS_PER_TOKEN: usize = 3;

/// Fraction of symbol characters above which text counts as dense
pub const SYMBOL_DENSITY_THRESHOLD: f64 = 0.15;

/// Texts at or below this length always use the prose ratio
pub const DENSITY_MIN_LEN: usize = 10;

/// Anything that is neither alphanumeric nor whitespace
static SYMBOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{Alphabetic}\p{Nd}\s]").expect("valid symbol regex"));

/// Estimate the prompt-token cost of `text`.
///
/// Empty text costs 0, anything from 1 to 4 characters costs 1, otherwise
/// `ceil(len / 4)`, or `ceil(len / 3)` when more than 15% of a text longer
/// than 10 characters is symbols.
pub fn estimate_tokens(text: &str) -> u64 {
    let len = text.chars().count();
    if len == 0 {
        return 0;
    }

    let ratio = if len > DENSITY_MIN_LEN && symbol_density(text, len) > SYMBOL_DENSITY_THRESHOLD {
        DENSE_CHARS_PER_TOKEN
    } else {
        CHARS_PER_TOKEN
    };

    len.div_ceil(ratio) as u64
}

/// Estimate tokens for any serializable value via its JSON form.
///
/// Values that fail to serialize (non-string map keys, a failing custom
/// `Serialize` impl) cost 0.
pub fn estimate_structured_tokens<T: Serialize + ?Sized>(value: &T) -> u64 {
    match serde_json::to_string(value) {
        Ok(json) => estimate_tokens(&json),
        Err(e) => {
            tracing::debug!("Structured token estimate skipped: {}", e);
            0
        }
    }
}

fn symbol_density(text: &str, len: usize) -> f64 {
    let symbols = SYMBOL_RE.find_iter(text).count();
    symbols as f64 / len as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_anchor_values() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"a".repeat(1600)), 400);
    }

    #[test]
    fn test_deterministic() {
        let text = "fn main() { println!(\"hi\"); }";
        let first = estimate_tokens(text);
        for _ in 0..10 {
            assert_eq!(estimate_tokens(text), first);
        }
    }

    #[test]
    fn test_symbol_dense_text_costs_more() {
        // 12 chars, 9 symbols: dense
        let code = "a{}();[]<>=b";
        assert_eq!(estimate_tokens(code), 4);
        // Same length, plain letters
        assert_eq!(estimate_tokens("abcdefghijkl"), 3);
    }

    #[test]
    fn test_short_text_ignores_density() {
        // 10 chars of symbols stays on the prose ratio
        assert_eq!(estimate_tokens("{}{}{}{}{}"), 3);
    }

    #[test]
    fn test_whitespace_is_not_a_symbol() {
        let prose = "the quick brown fox jumps over";
        assert_eq!(estimate_tokens(prose), 8);
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        assert_eq!(estimate_tokens("ééééé"), 2);
    }

    #[test]
    fn test_structured_value() {
        let value = serde_json::json!({ "a": 1 });
        // {"a":1} is 7 chars
        assert!(estimate_structured_tokens(&value) > 0);
    }

    #[test]
    fn test_unserializable_value_is_zero() {
        let mut map: HashMap<(i32, i32), i32> = HashMap::new();
        map.insert((1, 2), 3);
        assert_eq!(estimate_structured_tokens(&map), 0);
    }
}
