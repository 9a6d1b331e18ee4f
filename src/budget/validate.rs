//! Invariant checks and repair
//!
//! `used_tokens` is maintained incrementally and is not re-derived on every
//! operation, so drift (hand-edited files, older writers, bugs) is caught
//! here and fixed on demand.

use super::item::Tier;
use super::store::ContextBudget;
use super::tokens::estimate_tokens;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Outcome of `validate_budget`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub valid: bool,
    /// Stored minus recomputed; positive means over-counted
    pub discrepancy: i64,
    pub expected_tokens: u64,
}

/// What `repair_budget` changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub items_reestimated: usize,
    pub tiers_corrected: usize,
    pub previous_used_tokens: u64,
    pub used_tokens: u64,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        self.items_reestimated > 0
            || self.tiers_corrected > 0
            || self.previous_used_tokens != self.used_tokens
    }
}

/// Compare the stored `used_tokens` against the sum of item tokens
pub fn validate_budget(budget: &ContextBudget) -> Validation {
    let expected = budget
        .items()
        .fold(0u64, |total, item| total.saturating_add(item.tokens));
    let discrepancy = i128::from(budget.used_tokens) - i128::from(expected);
    let discrepancy = discrepancy.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;
    Validation {
        valid: discrepancy == 0,
        discrepancy,
        expected_tokens: expected,
    }
}

/// Re-estimate drifted items and recompute `used_tokens` in one pass
pub fn repair_budget(budget: &mut ContextBudget) -> RepairReport {
    let mut report = RepairReport {
        previous_used_tokens: budget.used_tokens,
        ..RepairReport::default()
    };
    let mut total: u64 = 0;

    for tier in Tier::ALL {
        for item in budget.tiers.get_mut(tier).iter_mut() {
            let fresh = estimate_tokens(&item.content);
            if item.tokens != fresh {
                debug!("Re-estimated {}: {} -> {} tokens", item.id, item.tokens, fresh);
                item.tokens = fresh;
                report.items_reestimated += 1;
            }
            if item.tier != tier {
                item.tier = tier;
                report.tiers_corrected += 1;
            }
            total = total.saturating_add(item.tokens);
        }
    }

    budget.used_tokens = total;
    report.used_tokens = total;

    if report.changed() {
        info!(
            "Repaired budget: {} -> {} tokens ({} re-estimated, {} tier fields fixed)",
            report.previous_used_tokens,
            report.used_tokens,
            report.items_reestimated,
            report.tiers_corrected
        );
    }
    report
}
