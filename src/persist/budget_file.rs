//! Budget persistence
//!
//! The budget file is a single writer's snapshot: `save` overwrites it
//! without merging. Loading rebuilds the budget from an allow-list of keys
//! and hardens every item record on the way in.

use super::fields::{get_array, get_i64, get_object, get_str, get_timestamp, get_u64};
use super::{JsonStateStore, PersistedState};
use crate::budget::{
    estimate_tokens, CompactionRecord, ContentType, ContextBudget, ContextItem, Tier,
    TokenCeiling, DEFAULT_PRIORITY, ID_PREFIX, MAX_PRIORITY,
};
use crate::ids::generate_id;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

pub const BUDGET_FILE_NAME: &str = "context-budget.json";

/// Budget state at `<project>/.ctxbudget/context-budget.json`
pub type BudgetStore = JsonStateStore<ContextBudget>;

impl PersistedState for ContextBudget {
    const FILE_NAME: &'static str = BUDGET_FILE_NAME;

    fn from_json(obj: &Map<String, Value>) -> Self {
        budget_from_json(obj, Utc::now())
    }
}

fn budget_from_json(obj: &Map<String, Value>, now: DateTime<Utc>) -> ContextBudget {
    let mut budget = ContextBudget::default();

    match obj.get("maxTokens") {
        Some(Value::Null) => budget.max_tokens = TokenCeiling::Unbounded,
        Some(_) => {
            if let Some(max) = get_i64(obj, "maxTokens") {
                budget.max_tokens = TokenCeiling::Limited(max);
            }
        }
        None => {}
    }
    if let Some(used) = get_u64(obj, "usedTokens") {
        budget.used_tokens = used;
    }
    if let Some(start) = get_timestamp(obj, "sessionStart") {
        budget.session_start = start;
    }

    if let Some(tiers) = get_object(obj, "tiers") {
        let mut seen = HashSet::new();
        for tier in Tier::ALL {
            let Some(records) = get_array(tiers, tier.as_str()) else {
                continue;
            };
            for record in records {
                match item_from_json(record, tier, now) {
                    Some(item) if seen.insert(item.id.clone()) => {
                        budget.tiers.get_mut(tier).push(item)
                    }
                    Some(item) => debug!("Skipping duplicate item {}", item.id),
                    None => debug!("Skipping malformed item in {} tier", tier),
                }
            }
        }
    }

    if let Some(history) = get_array(obj, "compactionHistory") {
        for record in history.iter().filter_map(record_from_json) {
            budget.push_compaction_record(record);
        }
    }

    budget
}

/// Harden one item record. `tier` is the bucket it was found in.
fn item_from_json(value: &Value, tier: Tier, now: DateTime<Utc>) -> Option<ContextItem> {
    let obj = value.as_object()?;
    let content = get_str(obj, "content")?.to_string();

    let id = match get_str(obj, "id") {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => generate_id(ID_PREFIX, now),
    };
    let content_type = get_str(obj, "type")
        .and_then(ContentType::parse)
        .unwrap_or(ContentType::Metadata);
    // No estimate ever exceeds one token per character
    let max_plausible = content.chars().count() as u64;
    let tokens = get_u64(obj, "tokens")
        .filter(|t| *t <= max_plausible)
        .unwrap_or_else(|| estimate_tokens(&content));
    let priority = get_i64(obj, "priority")
        .map(|p| p.clamp(0, i64::from(MAX_PRIORITY)) as u8)
        .unwrap_or(DEFAULT_PRIORITY);
    let created_at = get_timestamp(obj, "createdAt").unwrap_or(now);
    let last_accessed_at = get_timestamp(obj, "lastAccessedAt").unwrap_or(created_at);
    let access_count = get_u64(obj, "accessCount")
        .filter(|n| *n > 0)
        .unwrap_or(1);

    Some(ContextItem {
        id,
        content_type,
        tier,
        content,
        tokens,
        priority,
        created_at,
        last_accessed_at,
        access_count,
    })
}

fn record_from_json(value: &Value) -> Option<CompactionRecord> {
    let obj = value.as_object()?;
    Some(CompactionRecord {
        timestamp: get_timestamp(obj, "timestamp")?,
        tokens_before: get_u64(obj, "tokensBefore")?,
        tokens_after: get_u64(obj, "tokensAfter")?,
        items_compacted: get_u64(obj, "itemsCompacted").unwrap_or(0) as usize,
        items_dropped: get_u64(obj, "itemsDropped").unwrap_or(0) as usize,
        duration: get_u64(obj, "duration").unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{validate_budget, AddOptions, DEFAULT_MAX_TOKENS};
    use crate::persist::STATE_DIR;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn setup_store() -> (TempDir, BudgetStore) {
        let temp = TempDir::new().unwrap();
        let store = BudgetStore::new(temp.path());
        (temp, store)
    }

    fn write_raw(store: &BudgetStore, body: &str) {
        fs::create_dir_all(store.state_dir()).unwrap();
        fs::write(store.path(), body).unwrap();
    }

    fn is_pristine(budget: &ContextBudget) -> bool {
        budget.max_tokens == TokenCeiling::Limited(DEFAULT_MAX_TOKENS)
            && budget.used_tokens == 0
            && budget.item_count() == 0
            && budget.compaction_history.is_empty()
    }

    #[test]
    fn test_path_layout() {
        let (temp, store) = setup_store();
        assert_eq!(store.path(), temp.path().join(STATE_DIR).join(BUDGET_FILE_NAME));
    }

    #[test]
    fn test_load_missing_directory() {
        let (_temp, store) = setup_store();
        assert!(!store.state_dir().exists());
        assert!(is_pristine(&store.load()));
    }

    #[test]
    fn test_load_empty_and_garbage_files() {
        let (_temp, store) = setup_store();
        for body in ["", "not json", "[]", "null", "{\"maxTokens\": "] {
            write_raw(&store, body);
            assert!(is_pristine(&store.load()), "not a default for {:?}", body);
        }
    }

    #[test]
    fn test_round_trip() {
        let (_temp, store) = setup_store();
        // Timestamps persist at millisecond precision
        let now = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        let mut budget = ContextBudget::with_limit(5000);
        budget.session_start = now;
        budget.add_content_at("fn main() {}", ContentType::File, AddOptions::default(), now);
        budget.add_content_at(
            "never forget",
            ContentType::System,
            AddOptions::default().with_tier(Tier::Frozen),
            now,
        );
        budget.add_content_at(
            "prior answer",
            ContentType::Response,
            AddOptions::default().with_tier(Tier::Warm).with_priority(80),
            now,
        );

        assert!(store.save(&budget));
        let loaded = store.load();
        assert_eq!(loaded, budget);
    }

    #[test]
    fn test_unbounded_round_trip() {
        let (_temp, store) = setup_store();
        let budget = ContextBudget::new(TokenCeiling::Unbounded);
        assert!(store.save(&budget));

        let raw: Value = serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert!(raw["maxTokens"].is_null());
        assert_eq!(store.load().max_tokens, TokenCeiling::Unbounded);
    }

    #[test]
    fn test_prototype_keys_are_ignored() {
        let (_temp, store) = setup_store();
        write_raw(
            &store,
            r#"{"__proto__": {"polluted": true, "maxTokens": 1},
                "constructor": {"prototype": {"usedTokens": 9}},
                "tiers": {"__proto__": [{"id": "x", "content": "evil"}]}}"#,
        );

        let budget = store.load();
        assert!(is_pristine(&budget));
    }

    #[test]
    fn test_unknown_fields_ignored_and_missing_backfilled() {
        let (_temp, store) = setup_store();
        write_raw(&store, r#"{"maxTokens": 1234, "extra": [1, 2], "tiers": {"hot": []}}"#);

        let budget = store.load();
        assert_eq!(budget.max_tokens, TokenCeiling::Limited(1234));
        assert_eq!(budget.used_tokens, 0);
        assert!(budget.tiers.warm.is_empty());
    }

    #[test]
    fn test_item_records_are_hardened() {
        let (_temp, store) = setup_store();
        let body = json!({
            "maxTokens": 1000,
            "usedTokens": 99,
            "tiers": {
                "hot": [
                    {"id": "a", "type": "file", "tier": "frozen", "content": "abcdefgh",
                     "tokens": 2, "priority": 250, "createdAt": 1_700_000_000_000i64,
                     "lastAccessedAt": "2023-11-14T22:13:20Z", "accessCount": 3},
                    {"id": "b", "type": "bogus", "content": "abcde", "tokens": -4, "priority": -1},
                    "not an object",
                    {"id": "c"}
                ],
                "warm": [
                    {"id": "a", "type": "file", "content": "duplicate"},
                    {"type": "error", "content": "no id here", "accessCount": 0}
                ]
            }
        });
        write_raw(&store, &body.to_string());

        let budget = store.load();
        assert_eq!(budget.tiers.hot.len(), 2);
        assert_eq!(budget.tiers.warm.len(), 1);

        let a = budget.find_item("a").unwrap();
        assert_eq!(a.tier, Tier::Hot);
        assert_eq!(a.priority, MAX_PRIORITY);
        assert_eq!(a.tokens, 2);
        assert_eq!(a.access_count, 3);
        assert_eq!(a.created_at, a.last_accessed_at);

        let b = budget.find_item("b").unwrap();
        assert_eq!(b.content_type, ContentType::Metadata);
        assert_eq!(b.tokens, 2);
        assert_eq!(b.priority, 0);

        let generated = &budget.tiers.warm[0];
        assert!(generated.id.starts_with(ID_PREFIX));
        assert_eq!(generated.content_type, ContentType::Error);
        assert_eq!(generated.access_count, 1);

        // The stored counter is kept as-is so drift stays visible
        assert_eq!(budget.used_tokens, 99);
        assert!(!validate_budget(&budget).valid);
    }

    #[test]
    fn test_implausible_token_counts_are_reestimated() {
        let (_temp, store) = setup_store();
        let body = json!({
            "maxTokens": 1000,
            "usedTokens": u64::MAX,
            "tiers": {
                "hot": [
                    {"id": "huge", "type": "file", "content": "abcdefgh", "tokens": u64::MAX},
                    {"id": "float", "type": "file", "content": "abcdefgh", "tokens": 1e300},
                    {"id": "long", "type": "file", "content": "abcd", "tokens": 5},
                    {"id": "ok", "type": "file", "content": "abcdefgh", "tokens": 8}
                ]
            }
        });
        write_raw(&store, &body.to_string());

        let budget = store.load();
        assert_eq!(budget.find_item("huge").unwrap().tokens, 2);
        assert_eq!(budget.find_item("float").unwrap().tokens, 2);
        assert_eq!(budget.find_item("long").unwrap().tokens, 1);
        assert_eq!(budget.find_item("ok").unwrap().tokens, 8);

        let validation = validate_budget(&budget);
        assert_eq!(validation.expected_tokens, 13);
        assert_eq!(validation.discrepancy, i64::MAX);
    }

    #[test]
    fn test_compaction_history_is_filtered_and_capped() {
        let (_temp, store) = setup_store();
        let mut history: Vec<Value> = (0..120)
            .map(|i| json!({"timestamp": 1_700_000_000_000i64 + i, "tokensBefore": i, "tokensAfter": 0}))
            .collect();
        history.push(json!({"tokensBefore": 1}));
        history.push(json!("junk"));
        write_raw(&store, &json!({"compactionHistory": history}).to_string());

        let budget = store.load();
        assert_eq!(budget.compaction_history.len(), 100);
        assert_eq!(budget.compaction_history[0].tokens_before, 20);
        assert_eq!(budget.compaction_history[99].tokens_before, 119);
    }

    #[test]
    fn test_clear_writes_default() {
        let (_temp, store) = setup_store();
        let mut budget = ContextBudget::with_limit(10);
        budget.add_content("something", ContentType::Task, AddOptions::default());
        assert!(store.save(&budget));

        let fresh = store.clear();
        assert!(is_pristine(&fresh));
        assert!(is_pristine(&store.load()));
    }

    #[test]
    fn test_save_reports_failure() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(STATE_DIR), "a file, not a directory").unwrap();
        let store = BudgetStore::new(temp.path());

        assert!(!store.save(&ContextBudget::default()));
        assert!(store.try_save(&ContextBudget::default()).is_err());
    }
}
