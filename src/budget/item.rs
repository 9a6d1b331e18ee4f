//! Context items and their classification

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default priority for new items
pub const DEFAULT_PRIORITY: u8 = 50;

/// Highest allowed priority
pub const MAX_PRIORITY: u8 = 100;

/// What a context item holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Task,
    File,
    Error,
    Response,
    Summary,
    Reference,
    System,
    Metadata,
}

impl ContentType {
    pub const ALL: [ContentType; 8] = [
        Self::Task,
        Self::File,
        Self::Error,
        Self::Response,
        Self::Summary,
        Self::Reference,
        Self::System,
        Self::Metadata,
    ];

    /// Whether aging leaves this type where it is
    pub fn is_exempt_from_aging(self) -> bool {
        match self {
            Self::System | Self::Task => true,
            Self::File
            | Self::Error
            | Self::Response
            | Self::Summary
            | Self::Reference
            | Self::Metadata => false,
        }
    }

    /// Whether compaction may never drop this type
    pub fn is_never_dropped(self) -> bool {
        match self {
            Self::System => true,
            Self::Task
            | Self::File
            | Self::Error
            | Self::Response
            | Self::Summary
            | Self::Reference
            | Self::Metadata => false,
        }
    }

    /// Whether compaction may rewrite the content of this type
    pub fn is_summarizable(self) -> bool {
        !matches!(self, Self::System)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::File => "file",
            Self::Error => "error",
            Self::Response => "response",
            Self::Summary => "summary",
            Self::Reference => "reference",
            Self::System => "system",
            Self::Metadata => "metadata",
        }
    }

    /// Parse a lowercase type name
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Recency bucket, hottest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
    Frozen,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Self::Hot, Self::Warm, Self::Cold, Self::Frozen];

    /// The next colder tier, `None` for frozen
    pub fn colder(self) -> Option<Tier> {
        match self {
            Self::Hot => Some(Self::Warm),
            Self::Warm => Some(Self::Cold),
            Self::Cold => Some(Self::Frozen),
            Self::Frozen => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
            Self::Frozen => "frozen",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single piece of content held in the budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    pub id: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub tier: Tier,
    pub content: String,
    /// Estimated token cost of `content`
    pub tokens: u64,
    /// 0-100, higher survives compaction longer
    pub priority: u8,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
}

impl ContextItem {
    /// Record an access. The timestamp never moves backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
    }

    /// Milliseconds since last access, zero if the clock is behind
    pub fn idle_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_accessed_at).num_milliseconds().max(0)
    }
}
