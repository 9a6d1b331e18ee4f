//! Saturation diagnostics
//!
//! Read-only view over a budget: usage per tier plus generated
//! recommendations.

use super::compact::{truncate_with_ellipsis, DEFAULT_SUMMARY_MAX_CHARS};
use super::item::Tier;
use super::store::{calculate_saturation, ContextBudget, SaturationLevel, TokenCeiling};
use super::tokens::estimate_tokens;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hot items idle longer than this are flagged (10 minutes)
pub const DEFAULT_STALE_AFTER_SECS: u64 = 600;

/// Soft per-tier item limits and staleness window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportConfig {
    pub hot_limit: usize,
    pub warm_limit: usize,
    pub cold_limit: usize,
    pub frozen_limit: usize,
    pub stale_after: Duration,
    /// Character cap used when estimating summarization savings
    pub summary_max_chars: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            hot_limit: 20,
            warm_limit: 50,
            cold_limit: 100,
            frozen_limit: 200,
            stale_after: Duration::seconds(DEFAULT_STALE_AFTER_SECS as i64),
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
        }
    }
}

impl ReportConfig {
    pub fn limit_for(&self, tier: Tier) -> usize {
        match tier {
            Tier::Hot => self.hot_limit,
            Tier::Warm => self.warm_limit,
            Tier::Cold => self.cold_limit,
            Tier::Frozen => self.frozen_limit,
        }
    }
}

/// Item and token totals for one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierUsage {
    pub items: usize,
    pub tokens: u64,
}

/// Snapshot of budget health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaturationReport {
    pub saturation: f64,
    pub level: SaturationLevel,
    pub used_tokens: u64,
    pub max_tokens: TokenCeiling,
    pub tier_breakdown: BTreeMap<Tier, TierUsage>,
    pub recommendations: Vec<String>,
    pub compaction_recommended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub potential_savings: Option<u64>,
}

impl SaturationReport {
    /// Format as a short log-friendly line
    pub fn to_log_string(&self) -> String {
        format!(
            "context: {} tokens ({:.0}% of {}, {})",
            self.used_tokens,
            self.saturation * 100.0,
            self.max_tokens,
            self.level
        )
    }
}

/// Build a report against the wall clock
pub fn saturation_report(budget: &ContextBudget, config: &ReportConfig) -> SaturationReport {
    saturation_report_at(budget, config, Utc::now())
}

pub fn saturation_report_at(
    budget: &ContextBudget,
    config: &ReportConfig,
    now: DateTime<Utc>,
) -> SaturationReport {
    let saturation = calculate_saturation(budget);
    let level = SaturationLevel::from_saturation(saturation);
    let mut recommendations = Vec::new();

    let mut tier_breakdown = BTreeMap::new();
    for tier in Tier::ALL {
        let items = budget.tiers.get(tier);
        let usage = TierUsage {
            items: items.len(),
            tokens: items
                .iter()
                .fold(0u64, |total, item| total.saturating_add(item.tokens)),
        };
        let limit = config.limit_for(tier);
        if usage.items > limit {
            recommendations.push(format!(
                "{} tier is over limit ({} items, soft limit {})",
                tier, usage.items, limit
            ));
        }
        tier_breakdown.insert(tier, usage);
    }

    let stale_ms = config.stale_after.num_milliseconds().max(0);
    let stale = budget
        .tiers
        .hot
        .iter()
        .filter(|item| item.idle_ms(now) > stale_ms)
        .count();
    if stale > 0 {
        recommendations.push(format!(
            "{} hot item(s) not accessed in over {} minutes; consider aging",
            stale,
            config.stale_after.num_minutes()
        ));
    }

    let compaction_recommended = level >= SaturationLevel::Warning;
    let mut potential_savings = None;
    if compaction_recommended {
        recommendations.push(format!(
            "Saturation is {} ({:.0}%); run compaction",
            level,
            saturation * 100.0
        ));
        let warm_tokens = tier_breakdown.get(&Tier::Warm).map_or(0, |u| u.tokens);
        if warm_tokens > 0 {
            potential_savings = Some(summarization_savings(budget, config.summary_max_chars));
        }
    }

    SaturationReport {
        saturation,
        level,
        used_tokens: budget.used_tokens,
        max_tokens: budget.max_tokens,
        tier_breakdown,
        recommendations,
        compaction_recommended,
        potential_savings,
    }
}

/// Tokens that truncating every summarizable warm item would free
fn summarization_savings(budget: &ContextBudget, max_chars: usize) -> u64 {
    budget
        .tiers
        .warm
        .iter()
        .filter(|item| item.content_type.is_summarizable())
        .map(|item| {
            let summarized = estimate_tokens(&truncate_with_ellipsis(&item.content, max_chars));
            item.tokens.saturating_sub(summarized)
        })
        .fold(0u64, u64::saturating_add)
}
