//! Tool call log
//!
//! Append-only record of the tools an agent invoked during a session.

use super::fields::{get_array, get_str, get_timestamp};
use super::{merge_entries, LogEntry, PersistedState};
use crate::ids::generate_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const TRACKER_FILE_NAME: &str = "tool-calls.json";

/// Maximum number of calls kept
pub const TOOL_CALL_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub at: DateTime<Utc>,
}

impl LogEntry for ToolCall {
    fn entry_id(&self) -> &str {
        &self.id
    }

    fn recorded_at(&self) -> DateTime<Utc> {
        self.at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallTracker {
    pub session_id: String,
    /// Newest first
    pub calls: Vec<ToolCall>,
}

impl Default for ToolCallTracker {
    fn default() -> Self {
        Self {
            session_id: generate_id("session-", Utc::now()),
            calls: Vec::new(),
        }
    }
}

impl ToolCallTracker {
    pub fn record(&mut self, tool: impl Into<String>, summary: Option<String>) -> &ToolCall {
        self.record_at(tool, summary, Utc::now())
    }

    pub fn record_at(
        &mut self,
        tool: impl Into<String>,
        summary: Option<String>,
        now: DateTime<Utc>,
    ) -> &ToolCall {
        let call = ToolCall {
            id: generate_id("call-", now),
            tool: tool.into(),
            summary,
            at: now,
        };
        self.calls.insert(0, call);
        self.calls.truncate(TOOL_CALL_LIMIT);
        &self.calls[0]
    }

    /// Number of logged calls to `tool`, across every session in the file
    pub fn count_for(&self, tool: &str) -> usize {
        self.calls.iter().filter(|c| c.tool == tool).count()
    }
}

impl PersistedState for ToolCallTracker {
    const FILE_NAME: &'static str = TRACKER_FILE_NAME;
    const MERGES_ON_SAVE: bool = true;

    fn from_json(obj: &Map<String, Value>) -> Self {
        let mut tracker = Self::default();
        if let Some(session_id) = get_str(obj, "sessionId").filter(|s| !s.is_empty()) {
            tracker.session_id = session_id.to_string();
        }
        let calls = get_array(obj, "calls")
            .map(|records| records.iter().filter_map(call_from_json).collect())
            .unwrap_or_default();
        tracker.calls = merge_entries(calls, Vec::new(), TOOL_CALL_LIMIT);
        tracker
    }

    fn merge_from(&mut self, on_disk: Self) {
        let ours = std::mem::take(&mut self.calls);
        self.calls = merge_entries(ours, on_disk.calls, TOOL_CALL_LIMIT);
    }
}

fn call_from_json(value: &Value) -> Option<ToolCall> {
    let obj = value.as_object()?;
    Some(ToolCall {
        id: get_str(obj, "id").filter(|id| !id.is_empty())?.to_string(),
        tool: get_str(obj, "tool")?.to_string(),
        summary: get_str(obj, "summary").map(str::to_string),
        at: get_timestamp(obj, "at")?,
    })
}
