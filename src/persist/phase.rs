//! Workflow phase tracking
//!
//! Records which phase the session is in and an append-only log of phase
//! changes. Several processes may advance the phase; their transition logs
//! are merged on save.

use super::fields::{get_array, get_str, get_timestamp};
use super::{merge_entries, LogEntry, PersistedState};
use crate::ids::generate_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PHASE_FILE_NAME: &str = "phase-state.json";

/// Maximum number of transitions kept
pub const PHASE_TRANSITION_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub id: String,
    pub from: Option<String>,
    pub to: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub at: DateTime<Utc>,
}

impl LogEntry for PhaseTransition {
    fn entry_id(&self) -> &str {
        &self.id
    }

    fn recorded_at(&self) -> DateTime<Utc> {
        self.at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseState {
    pub current_phase: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    /// Newest first
    pub transitions: Vec<PhaseTransition>,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self {
            current_phase: None,
            updated_at: Utc::now(),
            transitions: Vec::new(),
        }
    }
}

impl PhaseState {
    /// Move to phase `to`, recording the transition
    pub fn advance(&mut self, to: impl Into<String>) -> &PhaseTransition {
        self.advance_at(to, Utc::now())
    }

    pub fn advance_at(&mut self, to: impl Into<String>, now: DateTime<Utc>) -> &PhaseTransition {
        let to = to.into();
        let transition = PhaseTransition {
            id: generate_id("phase-", now),
            from: self.current_phase.replace(to.clone()),
            to,
            at: now,
        };
        self.updated_at = now;
        self.transitions.insert(0, transition);
        self.transitions.truncate(PHASE_TRANSITION_LIMIT);
        &self.transitions[0]
    }

    pub fn last_transition(&self) -> Option<&PhaseTransition> {
        self.transitions.first()
    }
}

impl PersistedState for PhaseState {
    const FILE_NAME: &'static str = PHASE_FILE_NAME;
    const MERGES_ON_SAVE: bool = true;

    fn from_json(obj: &Map<String, Value>) -> Self {
        let transitions = get_array(obj, "transitions")
            .map(|records| records.iter().filter_map(transition_from_json).collect())
            .unwrap_or_default();
        Self {
            current_phase: get_str(obj, "currentPhase")
                .filter(|p| !p.trim().is_empty())
                .map(str::to_string),
            updated_at: get_timestamp(obj, "updatedAt").unwrap_or_else(Utc::now),
            transitions: merge_entries(transitions, Vec::new(), PHASE_TRANSITION_LIMIT),
        }
    }

    fn merge_from(&mut self, on_disk: Self) {
        let ours = std::mem::take(&mut self.transitions);
        self.transitions = merge_entries(ours, on_disk.transitions, PHASE_TRANSITION_LIMIT);
    }
}

fn transition_from_json(value: &Value) -> Option<PhaseTransition> {
    let obj = value.as_object()?;
    Some(PhaseTransition {
        id: get_str(obj, "id").filter(|id| !id.is_empty())?.to_string(),
        from: get_str(obj, "from").map(str::to_string),
        to: get_str(obj, "to")?.to_string(),
        at: get_timestamp(obj, "at")?,
    })
}
