//! Tiered budget store
//!
//! Holds every context item in one of four tier buckets and keeps the
//! aggregate `used_tokens` counter in step with add/remove. The budget is a
//! plain value: callers own it and pass it to each operation.

use super::item::{ContentType, ContextItem, Tier, DEFAULT_PRIORITY, MAX_PRIORITY};
use super::tokens::estimate_tokens;
use crate::ids::generate_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default context window size (in tokens)
pub const DEFAULT_MAX_TOKENS: i64 = 200_000;

/// Maximum number of compaction records kept
pub const COMPACTION_HISTORY_LIMIT: usize = 100;

pub const ID_PREFIX: &str = "ctx-";

/// Saturation at or above which the level is `Warning`
pub const WARNING_SATURATION: f64 = 0.80;
/// Saturation at or above which the level is `Critical`
pub const CRITICAL_SATURATION: f64 = 0.90;
/// Saturation at or above which the level is `Emergency`
pub const EMERGENCY_SATURATION: f64 = 0.95;

/// Configured token ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCeiling {
    /// A fixed ceiling. Zero or negative means "compact now".
    Limited(i64),
    /// No ceiling; saturation is always zero.
    Unbounded,
}

impl Default for TokenCeiling {
    fn default() -> Self {
        Self::Limited(DEFAULT_MAX_TOKENS)
    }
}

impl std::fmt::Display for TokenCeiling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{}", n),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}

// Unbounded round-trips through JSON as `null`, the way a non-finite
// number is written by most JSON producers.
impl Serialize for TokenCeiling {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Limited(n) => serializer.serialize_i64(*n),
            Self::Unbounded => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for TokenCeiling {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<i64>::deserialize(deserializer)? {
            Some(n) => Self::Limited(n),
            None => Self::Unbounded,
        })
    }
}

/// How urgently the budget needs compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaturationLevel {
    Optimal,
    Warning,
    Critical,
    Emergency,
}

impl SaturationLevel {
    /// Classify a saturation ratio. Lower bounds are inclusive.
    pub fn from_saturation(saturation: f64) -> Self {
        if saturation >= EMERGENCY_SATURATION {
            Self::Emergency
        } else if saturation >= CRITICAL_SATURATION {
            Self::Critical
        } else if saturation >= WARNING_SATURATION {
            Self::Warning
        } else {
            Self::Optimal
        }
    }
}

impl std::fmt::Display for SaturationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Optimal => "optimal",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        };
        f.pad(name)
    }
}

/// One entry of the compaction log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionRecord {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub tokens_before: u64,
    pub tokens_after: u64,
    pub items_compacted: usize,
    pub items_dropped: usize,
    /// Wall time in milliseconds
    pub duration: u64,
}

/// The four tier buckets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tiers {
    pub hot: Vec<ContextItem>,
    pub warm: Vec<ContextItem>,
    pub cold: Vec<ContextItem>,
    pub frozen: Vec<ContextItem>,
}

impl Tiers {
    pub fn get(&self, tier: Tier) -> &Vec<ContextItem> {
        match tier {
            Tier::Hot => &self.hot,
            Tier::Warm => &self.warm,
            Tier::Cold => &self.cold,
            Tier::Frozen => &self.frozen,
        }
    }

    pub fn get_mut(&mut self, tier: Tier) -> &mut Vec<ContextItem> {
        match tier {
            Tier::Hot => &mut self.hot,
            Tier::Warm => &mut self.warm,
            Tier::Cold => &mut self.cold,
            Tier::Frozen => &mut self.frozen,
        }
    }

    /// All items, hot first
    pub fn iter(&self) -> impl Iterator<Item = &ContextItem> {
        Tier::ALL.into_iter().flat_map(move |t| self.get(t).iter())
    }

    pub fn len(&self) -> usize {
        Tier::ALL.iter().map(|t| self.get(*t).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locate an item as (tier, index)
    fn position(&self, id: &str) -> Option<(Tier, usize)> {
        Tier::ALL.into_iter().find_map(|tier| {
            self.get(tier)
                .iter()
                .position(|item| item.id == id)
                .map(|idx| (tier, idx))
        })
    }
}

/// Placement and priority for a new item
#[derive(Debug, Clone, Copy)]
pub struct AddOptions {
    pub tier: Tier,
    pub priority: u8,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            tier: Tier::Hot,
            priority: DEFAULT_PRIORITY,
        }
    }
}

impl AddOptions {
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// Token budget with tiered content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextBudget {
    pub max_tokens: TokenCeiling,
    /// Sum of `tokens` over every item. Drift is reported by the validator.
    pub used_tokens: u64,
    pub tiers: Tiers,
    /// Oldest first, at most `COMPACTION_HISTORY_LIMIT` entries
    pub compaction_history: Vec<CompactionRecord>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub session_start: DateTime<Utc>,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::new(TokenCeiling::default())
    }
}

impl ContextBudget {
    /// Create an empty budget
    pub fn new(max_tokens: TokenCeiling) -> Self {
        Self {
            max_tokens,
            used_tokens: 0,
            tiers: Tiers::default(),
            compaction_history: Vec::new(),
            session_start: Utc::now(),
        }
    }

    /// Create an empty budget with a fixed ceiling
    pub fn with_limit(max_tokens: i64) -> Self {
        Self::new(TokenCeiling::Limited(max_tokens))
    }

    /// Add content, returning the stored item
    pub fn add_content(
        &mut self,
        content: impl Into<String>,
        content_type: ContentType,
        options: AddOptions,
    ) -> &ContextItem {
        self.add_content_at(content, content_type, options, Utc::now())
    }

    /// Add content with an explicit creation time
    pub fn add_content_at(
        &mut self,
        content: impl Into<String>,
        content_type: ContentType,
        options: AddOptions,
        now: DateTime<Utc>,
    ) -> &ContextItem {
        let content = content.into();
        let tokens = estimate_tokens(&content);
        let id = self.next_item_id(now);

        let item = ContextItem {
            id,
            content_type,
            tier: options.tier,
            content,
            tokens,
            priority: options.priority.min(MAX_PRIORITY),
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
        };
        debug!(
            "Adding {} item {} to {} ({} tokens)",
            content_type, item.id, options.tier, tokens
        );

        self.used_tokens = self.used_tokens.saturating_add(tokens);
        let bucket = self.tiers.get_mut(options.tier);
        bucket.push(item);
        &bucket[bucket.len() - 1]
    }

    /// Record an access. `None` if no item has this id.
    pub fn access_item(&mut self, id: &str) -> Option<&ContextItem> {
        self.access_item_at(id, Utc::now())
    }

    pub fn access_item_at(&mut self, id: &str, now: DateTime<Utc>) -> Option<&ContextItem> {
        let (tier, idx) = self.tiers.position(id)?;
        let item = &mut self.tiers.get_mut(tier)[idx];
        item.touch(now);
        Some(&*item)
    }

    /// Remove an item, returning whether it existed
    pub fn remove_item(&mut self, id: &str) -> bool {
        match self.take_item(id) {
            Some(item) => {
                debug!("Removed item {} ({} tokens)", item.id, item.tokens);
                true
            }
            None => false,
        }
    }

    /// Remove and return an item, keeping `used_tokens` in step
    fn take_item(&mut self, id: &str) -> Option<ContextItem> {
        let (tier, idx) = self.tiers.position(id)?;
        let item = self.tiers.get_mut(tier).remove(idx);
        self.used_tokens = self.used_tokens.saturating_sub(item.tokens);
        Some(item)
    }

    /// Move an item to another tier. Token usage is unchanged.
    pub fn move_to_tier(&mut self, id: &str, tier: Tier) -> bool {
        let Some((from, idx)) = self.tiers.position(id) else {
            return false;
        };
        if from == tier {
            return true;
        }
        let mut item = self.tiers.get_mut(from).remove(idx);
        item.tier = tier;
        self.tiers.get_mut(tier).push(item);
        true
    }

    pub fn find_item(&self, id: &str) -> Option<&ContextItem> {
        self.tiers.iter().find(|item| item.id == id)
    }

    /// Tier currently holding `id`
    pub fn tier_of(&self, id: &str) -> Option<Tier> {
        self.tiers.position(id).map(|(tier, _)| tier)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tiers.position(id).is_some()
    }

    /// All items, hot first
    pub fn items(&self) -> impl Iterator<Item = &ContextItem> {
        self.tiers.iter()
    }

    pub fn item_count(&self) -> usize {
        self.tiers.len()
    }

    /// Append to the compaction log, dropping the oldest on overflow
    pub fn push_compaction_record(&mut self, record: CompactionRecord) {
        self.compaction_history.push(record);
        if self.compaction_history.len() > COMPACTION_HISTORY_LIMIT {
            let excess = self.compaction_history.len() - COMPACTION_HISTORY_LIMIT;
            self.compaction_history.drain(..excess);
        }
    }

    /// Generate an id not used by any item in this budget
    fn next_item_id(&self, now: DateTime<Utc>) -> String {
        loop {
            let candidate = generate_id(ID_PREFIX, now);
            if !self.contains(&candidate) {
                return candidate;
            }
        }
    }
}

/// Fraction of the ceiling in use.
///
/// A ceiling of zero or below reports exactly 1.0 so callers compact
/// immediately; an unbounded ceiling reports exactly 0.0.
pub fn calculate_saturation(budget: &ContextBudget) -> f64 {
    saturation_of(budget.max_tokens, budget.used_tokens)
}

/// Saturation for a ceiling and a token count
pub fn saturation_of(max_tokens: TokenCeiling, used_tokens: u64) -> f64 {
    match max_tokens {
        TokenCeiling::Unbounded => 0.0,
        TokenCeiling::Limited(max) if max <= 0 => 1.0,
        TokenCeiling::Limited(max) => used_tokens as f64 / max as f64,
    }
}
