//! Budget compaction
//!
//! Shrinks `used_tokens` toward a target saturation, stopping as soon as the
//! target is met:
//!   1. Summarize warm items through the configured summarizer
//!   2. Drop frozen items, lowest priority then least recently used first
//!   3. Drop cold items in the same order
//!
//! `system` items are never dropped or rewritten. `error` items go last and
//! the final one in the budget is always kept.

use super::item::{ContentType, ContextItem, Tier};
use super::store::{calculate_saturation, saturation_of, CompactionRecord, ContextBudget};
use super::tokens::estimate_tokens;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info};

/// Default saturation to compact down to
pub const DEFAULT_TARGET_SATURATION: f64 = 0.7;

/// Default character cap handed to the summarizer
pub const DEFAULT_SUMMARY_MAX_CHARS: usize = 100;

/// Marker appended by the truncating summarizer
pub const TRUNCATION_MARKER: &str = "...";

/// Shortens content to at most `max_chars` characters
pub trait Summarizer {
    fn summarize(&self, content: &str, max_chars: usize) -> String;
}

impl<F> Summarizer for F
where
    F: Fn(&str, usize) -> String,
{
    fn summarize(&self, content: &str, max_chars: usize) -> String {
        self(content, max_chars)
    }
}

/// Default summarizer: keep the head of the content and mark the cut
#[derive(Debug, Clone, Copy, Default)]
pub struct TruncateSummarizer;

impl Summarizer for TruncateSummarizer {
    fn summarize(&self, content: &str, max_chars: usize) -> String {
        truncate_with_ellipsis(content, max_chars)
    }
}

/// Truncate on a char boundary so the result, marker included, fits
/// `max_chars`. Content that already fits is returned unchanged, and a
/// cap too small for the marker cuts without one.
pub fn truncate_with_ellipsis(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    if max_chars <= TRUNCATION_MARKER.len() {
        return content.chars().take(max_chars).collect();
    }
    let keep = max_chars - TRUNCATION_MARKER.len();
    let end = content
        .char_indices()
        .nth(keep)
        .map(|(i, _)| i)
        .unwrap_or(content.len());
    format!("{}{}", &content[..end], TRUNCATION_MARKER)
}

/// Compaction parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionOptions {
    pub target_saturation: f64,
    pub summary_max_chars: usize,
}

impl Default for CompactionOptions {
    fn default() -> Self {
        Self {
            target_saturation: DEFAULT_TARGET_SATURATION,
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
        }
    }
}

impl CompactionOptions {
    pub fn with_target(mut self, target_saturation: f64) -> Self {
        self.target_saturation = target_saturation;
        self
    }
}

/// What a compaction pass achieved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionResult {
    /// Whether saturation ended at or below the target
    pub success: bool,
    pub tokens_saved: u64,
    pub tokens_after: u64,
    pub items_compacted: usize,
    pub items_dropped: usize,
    /// Wall time in milliseconds
    pub duration: u64,
}

/// Compact with the default truncating summarizer
pub fn compact_budget(budget: &mut ContextBudget, options: &CompactionOptions) -> CompactionResult {
    compact_budget_with(budget, options, &TruncateSummarizer)
}

/// Compact with a custom summarizer
pub fn compact_budget_with(
    budget: &mut ContextBudget,
    options: &CompactionOptions,
    summarizer: &dyn Summarizer,
) -> CompactionResult {
    let started = Instant::now();
    let tokens_before = budget.used_tokens;
    let target = options.target_saturation;
    let mut items_compacted = 0;
    let mut items_dropped = 0;

    if !over_target(budget, target) {
        debug!("Compaction skipped, already under target {:.2}", target);
    } else {
        info!(
            "Context compaction triggered ({} tokens, saturation {:.2}, target {:.2})",
            tokens_before,
            calculate_saturation(budget),
            target
        );

        // 1. Summarize warm items
        items_compacted = summarize_warm(budget, options, summarizer);

        // 2-3. Drop frozen, then cold
        for tier in [Tier::Frozen, Tier::Cold] {
            if !over_target(budget, target) {
                break;
            }
            items_dropped += drop_from_tier(budget, tier, target);
        }
    }

    let tokens_after = budget.used_tokens;
    let duration = started.elapsed().as_millis() as u64;
    budget.push_compaction_record(CompactionRecord {
        timestamp: Utc::now(),
        tokens_before,
        tokens_after,
        items_compacted,
        items_dropped,
        duration,
    });

    let success = !over_target(budget, target);
    if items_compacted > 0 || items_dropped > 0 {
        info!(
            "Context compaction complete: {} tokens -> {} tokens ({} summarized, {} dropped)",
            tokens_before, tokens_after, items_compacted, items_dropped
        );
    }

    CompactionResult {
        success,
        tokens_saved: tokens_before.saturating_sub(tokens_after),
        tokens_after,
        items_compacted,
        items_dropped,
        duration,
    }
}

fn over_target(budget: &ContextBudget, target: f64) -> bool {
    calculate_saturation(budget) > target
}

fn summarize_warm(
    budget: &mut ContextBudget,
    options: &CompactionOptions,
    summarizer: &dyn Summarizer,
) -> usize {
    let max_tokens = budget.max_tokens;
    let used_before = budget.used_tokens;
    let mut compacted = 0;
    let mut saved = 0u64;

    for item in budget.tiers.warm.iter_mut() {
        if saturation_of(max_tokens, used_before.saturating_sub(saved)) <= options.target_saturation {
            break;
        }
        if !item.content_type.is_summarizable() {
            continue;
        }

        let summary = summarizer.summarize(&item.content, options.summary_max_chars);
        let tokens = estimate_tokens(&summary);
        // Only ever trade down
        if tokens >= item.tokens {
            continue;
        }

        debug!("Summarized {}: {} -> {} tokens", item.id, item.tokens, tokens);
        saved = saved.saturating_add(item.tokens - tokens);
        item.content = summary;
        item.tokens = tokens;
        compacted += 1;
    }

    budget.used_tokens = budget.used_tokens.saturating_sub(saved);
    compacted
}

/// Drop items from `tier` until the target is met or nothing droppable is left
fn drop_from_tier(budget: &mut ContextBudget, tier: Tier, target: f64) -> usize {
    let max_tokens = budget.max_tokens;
    let mut used = budget.used_tokens;
    let mut errors_left = budget
        .items()
        .filter(|item| item.content_type == ContentType::Error)
        .count();

    let mut candidates: Vec<&ContextItem> = budget
        .tiers
        .get(tier)
        .iter()
        .filter(|item| !item.content_type.is_never_dropped())
        .collect();
    candidates.sort_by(|a, b| drop_order(a, b));

    let mut doomed: HashSet<String> = HashSet::new();
    for item in candidates {
        if saturation_of(max_tokens, used) <= target {
            break;
        }
        if item.content_type == ContentType::Error {
            if errors_left <= 1 {
                continue;
            }
            errors_left -= 1;
        }
        debug!(
            "Dropping {} {} (priority {}, {} tokens)",
            tier, item.id, item.priority, item.tokens
        );
        used = used.saturating_sub(item.tokens);
        doomed.insert(item.id.clone());
    }

    if doomed.is_empty() {
        return 0;
    }
    budget.tiers.get_mut(tier).retain(|item| !doomed.contains(&item.id));
    budget.used_tokens = used;
    doomed.len()
}

/// Non-errors before errors, then lowest priority, then least recently used
fn drop_order(a: &ContextItem, b: &ContextItem) -> std::cmp::Ordering {
    let a_error = a.content_type == ContentType::Error;
    let b_error = b.content_type == ContentType::Error;
    a_error
        .cmp(&b_error)
        .then(a.priority.cmp(&b.priority))
        .then(a.last_accessed_at.cmp(&b.last_accessed_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::store::AddOptions;
    use crate::budget::validate::validate_budget;
    use chrono::Duration;

    fn add(budget: &mut ContextBudget, chars: usize, ct: ContentType, tier: Tier, priority: u8) -> String {
        budget
            .add_content(
                "a".repeat(chars),
                ct,
                AddOptions::default().with_tier(tier).with_priority(priority),
            )
            .id
            .clone()
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("short", 100), "short");
        assert_eq!(truncate_with_ellipsis("abcdefghij", 6), "abc...");
        assert_eq!(truncate_with_ellipsis("ééééééé", 5), "éé...");
    }

    #[test]
    fn test_truncate_below_marker_width() {
        assert_eq!(truncate_with_ellipsis("abcdefghij", 3), "abc");
        assert_eq!(truncate_with_ellipsis("abcdefghij", 2), "ab");
        assert_eq!(truncate_with_ellipsis("ééé", 1), "é");
        assert_eq!(truncate_with_ellipsis("abcdefghij", 0), "");
    }

    #[test]
    fn test_under_target_does_nothing() {
        let mut budget = ContextBudget::with_limit(1000);
        add(&mut budget, 400, ContentType::File, Tier::Warm, 50);

        let result = compact_budget(&mut budget, &CompactionOptions::default());
        assert!(result.success);
        assert_eq!(result.tokens_saved, 0);
        assert_eq!(result.items_compacted, 0);
        assert_eq!(result.items_dropped, 0);
        assert_eq!(budget.compaction_history.len(), 1);
        assert_eq!(budget.tiers.warm[0].content.len(), 400);
    }

    #[test]
    fn test_summarizes_warm_items_first() {
        let mut budget = ContextBudget::with_limit(1000);
        for _ in 0..3 {
            add(&mut budget, 1600, ContentType::File, Tier::Warm, 50);
        }
        assert_eq!(budget.used_tokens, 1200);

        let result = compact_budget(&mut budget, &CompactionOptions::default().with_target(0.1));
        assert!(result.success);
        assert_eq!(result.items_compacted, 3);
        assert_eq!(result.items_dropped, 0);
        assert_eq!(result.tokens_after, 75);
        assert!(budget.tiers.warm.iter().all(|i| i.content.ends_with(TRUNCATION_MARKER)));
        assert!(validate_budget(&budget).valid);
    }

    #[test]
    fn test_stops_summarizing_once_target_met() {
        let mut budget = ContextBudget::with_limit(1000);
        for _ in 0..3 {
            add(&mut budget, 1600, ContentType::File, Tier::Warm, 50);
        }
        // 1200 -> 0.9 needs 300 saved: one summary saves 375
        let result = compact_budget(&mut budget, &CompactionOptions::default().with_target(0.9));
        assert!(result.success);
        assert_eq!(result.items_compacted, 1);
    }

    #[test]
    fn test_drop_order_priority_then_recency() {
        let mut budget = ContextBudget::with_limit(100);
        let low = add(&mut budget, 160, ContentType::File, Tier::Frozen, 10);
        let mid_old = add(&mut budget, 160, ContentType::File, Tier::Frozen, 50);
        let mid_new = add(&mut budget, 160, ContentType::File, Tier::Frozen, 50);
        let high = add(&mut budget, 40, ContentType::File, Tier::Frozen, 90);
        let now = Utc::now();
        budget.access_item_at(&mid_new, now + Duration::seconds(60));
        assert_eq!(budget.used_tokens, 130);

        // Down to 50 tokens: the low item and one of the tied pair must go
        let result = compact_budget(&mut budget, &CompactionOptions::default().with_target(0.5));

        assert!(result.success);
        assert_eq!(result.items_dropped, 2);
        assert_eq!(budget.used_tokens, 50);
        assert!(!budget.contains(&low));
        assert!(!budget.contains(&mid_old));
        assert!(budget.contains(&mid_new));
        assert!(budget.contains(&high));
    }

    #[test]
    fn test_frozen_before_cold() {
        let mut budget = ContextBudget::with_limit(100);
        let cold = add(&mut budget, 200, ContentType::File, Tier::Cold, 0);
        let frozen = add(&mut budget, 200, ContentType::File, Tier::Frozen, 100);
        let result = compact_budget(&mut budget, &CompactionOptions::default().with_target(0.5));

        assert_eq!(result.items_dropped, 1);
        assert!(budget.contains(&cold));
        assert!(!budget.contains(&frozen));
    }

    #[test]
    fn test_system_items_survive() {
        let mut budget = ContextBudget::with_limit(10);
        let system = add(&mut budget, 400, ContentType::System, Tier::Frozen, 0);
        add(&mut budget, 400, ContentType::File, Tier::Cold, 0);

        let result = compact_budget(&mut budget, &CompactionOptions::default().with_target(0.0));
        assert!(!result.success);
        assert!(budget.contains(&system));
        assert_eq!(budget.item_count(), 1);
    }

    #[test]
    fn test_last_error_survives() {
        let mut budget = ContextBudget::with_limit(10);
        let e1 = add(&mut budget, 400, ContentType::Error, Tier::Frozen, 0);
        let e2 = add(&mut budget, 400, ContentType::Error, Tier::Cold, 0);
        let file = add(&mut budget, 400, ContentType::File, Tier::Frozen, 100);

        compact_budget(&mut budget, &CompactionOptions::default().with_target(0.0));

        assert!(!budget.contains(&file));
        // Exactly one error left
        assert_eq!(budget.contains(&e1) as u8 + budget.contains(&e2) as u8, 1);
    }

    #[test]
    fn test_errors_dropped_after_other_items() {
        let mut budget = ContextBudget::with_limit(1000);
        let error = add(&mut budget, 2000, ContentType::Error, Tier::Frozen, 0);
        add(&mut budget, 400, ContentType::Error, Tier::Hot, 0);
        let file = add(&mut budget, 2000, ContentType::File, Tier::Frozen, 100);
        // 1100 tokens: dropping the file alone reaches the target
        let result = compact_budget(&mut budget, &CompactionOptions::default().with_target(0.7));

        assert!(result.success);
        assert!(budget.contains(&error));
        assert!(!budget.contains(&file));
    }

    #[test]
    fn test_custom_summarizer_never_increases_usage() {
        let mut budget = ContextBudget::with_limit(100);
        add(&mut budget, 400, ContentType::File, Tier::Warm, 50);
        let before = budget.used_tokens;

        let inflate = |content: &str, _max: usize| content.repeat(3);
        let result = compact_budget_with(
            &mut budget,
            &CompactionOptions::default().with_target(0.1),
            &inflate,
        );

        assert_eq!(result.items_compacted, 0);
        assert!(budget.used_tokens <= before);
    }

    #[test]
    fn test_repeated_compaction_is_monotonic() {
        let mut budget = ContextBudget::with_limit(1000);
        for tier in [Tier::Warm, Tier::Cold, Tier::Frozen, Tier::Hot] {
            for _ in 0..3 {
                add(&mut budget, 600, ContentType::Response, tier, 40);
            }
        }
        let mut last = budget.used_tokens;
        for target in [0.9, 0.7, 0.5, 0.3, 0.1] {
            let result = compact_budget(&mut budget, &CompactionOptions::default().with_target(target));
            assert!(result.tokens_after <= last);
            last = result.tokens_after;
            assert!(validate_budget(&budget).valid);
        }
        assert_eq!(budget.compaction_history.len(), 5);
    }

    #[test]
    fn test_zero_ceiling_compacts_everything_droppable() {
        let mut budget = ContextBudget::with_limit(0);
        add(&mut budget, 40, ContentType::File, Tier::Cold, 50);
        let result = compact_budget(&mut budget, &CompactionOptions::default());
        assert_eq!(result.items_dropped, 1);
        assert!(!result.success);
    }
}
