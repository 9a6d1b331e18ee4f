//! ctxbudget - context budget engine for long-running agent sessions
//!
//! Tracks what sits in an agent's working context and how much of the token
//! window it costs:
//! - Tiered store (hot/warm/cold/frozen) with token accounting
//! - Time-based aging and saturation-driven compaction
//! - Saturation reports, validation and repair
//! - Corruption-tolerant JSON persistence that merges concurrent writers

pub mod budget;
pub mod config;
pub mod ids;
pub mod persist;

pub use budget::{
    age_items, calculate_saturation, compact_budget, repair_budget, saturation_report,
    validate_budget, AddOptions, CompactionOptions, ContentType, ContextBudget, ContextItem,
    SaturationLevel, Tier, TokenCeiling,
};
pub use config::Config;
pub use persist::{BudgetStore, JsonStateStore, PersistedState, PhaseState, ToolCallTracker};

use std::path::PathBuf;

/// Result type for ctxbudget operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ctxbudget
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config file {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Persistence error: {0}")]
    Persist(String),
}
