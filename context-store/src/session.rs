//! Session records.
//!
//! A session is a named container grouping related context items. It is
//! created once and afterwards only its `updated_at` and `item_count` fields
//! change, as a side effect of item writes.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{ContextError, Result};
use crate::ids;

/// A named container of context items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique identifier, immutable after creation.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Directory of the project the session was started from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,

    /// Channel applied to items saved without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_channel: Option<String>,

    /// Source-control branch the session was started on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Number of items currently stored under this session.
    #[serde(default)]
    pub item_count: usize,
}

impl Session {
    /// Build a fresh session record from a creation request.
    pub fn create(request: NewSession) -> Result<Self> {
        request.validate()?;
        let now = ids::now();
        Ok(Self {
            id: ids::generate_id(),
            name: request.name.trim().to_string(),
            description: request.description,
            project_dir: request.project_dir,
            default_channel: request.default_channel,
            branch: request.branch,
            created_at: now,
            updated_at: now,
            item_count: 0,
        })
    }

    /// Refresh the derived fields after an item write.
    pub fn touch(&mut self, item_count: usize, at: DateTime<Utc>) {
        self.item_count = item_count;
        self.updated_at = at;
    }
}

/// Parameters for starting a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub project_dir: Option<String>,
    #[serde(default)]
    pub default_channel: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

impl NewSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_project_dir(mut self, dir: impl Into<String>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    pub fn with_default_channel(mut self, channel: impl Into<String>) -> Self {
        self.default_channel = Some(channel.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Reject requests without a usable name.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ContextError::validation("session name must not be empty"));
        }
        Ok(())
    }
}

/// Read the checked-out branch of the git repository at `project_dir`.
///
/// Returns the branch name for a symbolic HEAD, the abbreviated commit for a
/// detached HEAD, and `None` when there is no readable repository.
pub async fn detect_branch(project_dir: &Path) -> Option<String> {
    let head = fs::read_to_string(project_dir.join(".git").join("HEAD"))
        .await
        .ok()?;
    let head = head.trim();
    match head.strip_prefix("ref: ") {
        Some(reference) => reference
            .strip_prefix("refs/heads/")
            .or(Some(reference))
            .map(str::to_string),
        None => head.get(..7).map(str::to_string),
    }
}
