//! Time-based demotion across tiers
//!
//! Tiers are swept hot, warm, cold. An item idle for longer than its
//! current tier's limit moves one tier colder and is checked again by the
//! next sweep, so a single pass settles every item and re-running with the
//! same clock is a no-op. `system` and `task` items never move.

use super::item::Tier;
use super::store::ContextBudget;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default idle time before a hot item cools (5 minutes)
pub const DEFAULT_HOT_MAX_AGE_SECS: u64 = 300;
/// Default idle time before a warm item cools (30 minutes)
pub const DEFAULT_WARM_MAX_AGE_SECS: u64 = 1800;
/// Default idle time before a cold item freezes (2 hours)
pub const DEFAULT_COLD_MAX_AGE_SECS: u64 = 7200;

/// Per-tier maximum idle time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgingThresholds {
    pub hot_max_age: Duration,
    pub warm_max_age: Duration,
    pub cold_max_age: Duration,
}

impl Default for AgingThresholds {
    fn default() -> Self {
        Self {
            hot_max_age: Duration::seconds(DEFAULT_HOT_MAX_AGE_SECS as i64),
            warm_max_age: Duration::seconds(DEFAULT_WARM_MAX_AGE_SECS as i64),
            cold_max_age: Duration::seconds(DEFAULT_COLD_MAX_AGE_SECS as i64),
        }
    }
}

impl AgingThresholds {
    /// Every threshold zero: all eligible items age on the next pass
    pub fn immediate() -> Self {
        Self {
            hot_max_age: Duration::zero(),
            warm_max_age: Duration::zero(),
            cold_max_age: Duration::zero(),
        }
    }

    fn for_tier(&self, tier: Tier) -> Option<Duration> {
        match tier {
            Tier::Hot => Some(self.hot_max_age),
            Tier::Warm => Some(self.warm_max_age),
            Tier::Cold => Some(self.cold_max_age),
            Tier::Frozen => None,
        }
    }
}

/// Result of an aging pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgingOutcome {
    /// Number of one-tier demotions performed
    pub aged: usize,
}

/// Age items against the wall clock
pub fn age_items(budget: &mut ContextBudget, thresholds: &AgingThresholds) -> AgingOutcome {
    age_items_at(budget, thresholds, Utc::now())
}

/// Age items against `now`.
///
/// A zero threshold ages an item even when `now` equals its last access.
pub fn age_items_at(
    budget: &mut ContextBudget,
    thresholds: &AgingThresholds,
    now: DateTime<Utc>,
) -> AgingOutcome {
    let mut aged = 0;

    for tier in [Tier::Hot, Tier::Warm, Tier::Cold] {
        let (Some(max_age), Some(colder)) = (thresholds.for_tier(tier), tier.colder()) else {
            continue;
        };

        let bucket = std::mem::take(budget.tiers.get_mut(tier));
        let mut stay = Vec::with_capacity(bucket.len());
        let mut demoted = Vec::new();

        for mut item in bucket {
            let idle = now - item.last_accessed_at;
            let expired = if max_age.is_zero() {
                true
            } else {
                idle > max_age
            };
            if expired && !item.content_type.is_exempt_from_aging() {
                debug!("Aging {} {} -> {}", item.id, tier, colder);
                item.tier = colder;
                demoted.push(item);
            } else {
                stay.push(item);
            }
        }

        aged += demoted.len();
        *budget.tiers.get_mut(tier) = stay;
        budget.tiers.get_mut(colder).extend(demoted);
    }

    if aged > 0 {
        info!("Aged {} context items", aged);
    }
    AgingOutcome { aged }
}
