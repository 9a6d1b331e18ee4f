//! Context budget engine
//!
//! A tiered, saturation-aware content cache for an agent's working context:
//! token estimation, the tiered store, aging, compaction, reporting, and
//! invariant repair.

mod aging;
mod compact;
mod item;
mod report;
mod store;
mod tokens;
mod validate;

pub use aging::{
    age_items, age_items_at, AgingOutcome, AgingThresholds, DEFAULT_COLD_MAX_AGE_SECS,
    DEFAULT_HOT_MAX_AGE_SECS, DEFAULT_WARM_MAX_AGE_SECS,
};
pub use compact::{
    compact_budget, compact_budget_with, truncate_with_ellipsis, CompactionOptions,
    CompactionResult, Summarizer, TruncateSummarizer, DEFAULT_SUMMARY_MAX_CHARS,
    DEFAULT_TARGET_SATURATION, TRUNCATION_MARKER,
};
pub use item::{ContentType, ContextItem, Tier, DEFAULT_PRIORITY, MAX_PRIORITY};
pub use report::{
    saturation_report, saturation_report_at, ReportConfig, SaturationReport, TierUsage,
    DEFAULT_STALE_AFTER_SECS,
};
pub use store::{
    calculate_saturation, saturation_of, AddOptions, CompactionRecord, ContextBudget,
    SaturationLevel, Tiers, TokenCeiling, COMPACTION_HISTORY_LIMIT, CRITICAL_SATURATION,
    DEFAULT_MAX_TOKENS, EMERGENCY_SATURATION, ID_PREFIX, WARNING_SATURATION,
};
pub use tokens::{
    estimate_structured_tokens, estimate_tokens, CHARS_PER_TOKEN, DENSE_CHARS_PER_TOKEN,
    DENSITY_MIN_LEN, SYMBOL_DENSITY_THRESHOLD,
};
pub use validate::{repair_budget, validate_budget, RepairReport, Validation};
