//! Context items: the key/value records stored under a session.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ContextError, Result};
use crate::ids;

/// A single key/value record stored under a session.
///
/// `(session_id, key)` is unique. Saving an existing key overwrites the
/// mutable fields in place and keeps `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    /// Unique identifier, stable across upserts of the same key.
    pub id: String,

    /// Owning session.
    pub session_id: String,

    pub key: String,

    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,

    #[serde(default)]
    pub priority: Priority,

    /// Arbitrary structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// Session-scoped, non-shared item.
    #[serde(default)]
    pub private: bool,

    /// Free-text grouping label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ContextItem {
    /// Build a brand new item from a save request.
    pub fn create(session_id: impl Into<String>, request: NewItem, at: DateTime<Utc>) -> Self {
        Self {
            id: ids::generate_id(),
            session_id: session_id.into(),
            key: request.key,
            value: request.value,
            category: request.category,
            priority: request.priority.unwrap_or_default(),
            metadata: request.metadata,
            private: request.private,
            channel: request.channel,
            created_at: at,
            updated_at: at,
        }
    }

    /// Overwrite the mutable fields from a save request for the same key.
    pub fn overwrite(&mut self, request: NewItem, at: DateTime<Utc>) {
        self.value = request.value;
        self.category = request.category;
        self.priority = request.priority.unwrap_or_default();
        self.metadata = request.metadata;
        self.private = request.private;
        self.channel = request.channel;
        self.updated_at = at;
    }
}

/// Parameters for saving (inserting or upserting) an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub channel: Option<String>,
}

impl NewItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    /// Reject requests missing a key or value.
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(ContextError::validation("key must not be empty"));
        }
        if self.value.is_empty() {
            return Err(ContextError::validation("value must not be empty"));
        }
        Ok(())
    }
}

/// Closed set of item categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Task,
    Decision,
    Progress,
    Note,
    Warning,
    Error,
    Critical,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Self::Task,
        Self::Decision,
        Self::Progress,
        Self::Note,
        Self::Warning,
        Self::Error,
        Self::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Decision => "decision",
            Self::Progress => "progress",
            Self::Note => "note",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                ContextError::validation(format!(
                    "invalid category '{s}'; expected one of task, decision, progress, note, warning, error, critical"
                ))
            })
    }
}

/// Item priority. Ordering follows urgency: `Critical < High < Normal < Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Self::Critical, Self::High, Self::Normal, Self::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    /// Sort rank used by priority ordering.
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| {
                ContextError::validation(format!(
                    "invalid priority '{s}'; expected one of critical, high, normal, low"
                ))
            })
    }
}
