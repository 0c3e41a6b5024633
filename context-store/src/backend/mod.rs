//! Storage backends.
//!
//! [`StorageBackend`] is the single persistence contract for sessions and
//! context items. Two interchangeable implementations exist:
//!
//! - [`JsonBackend`]: a sessions manifest plus one JSON file per session.
//! - [`SqliteBackend`]: an embedded SQLite database.
//!
//! Both must return identical results for identical inputs; query semantics
//! are defined by [`crate::query::select`].

mod json;
mod sqlite;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::KeeperConfig;
use crate::error::{ContextError, Result};
use crate::item::{ContextItem, NewItem};
use crate::query::ItemQuery;
use crate::session::{NewSession, Session};

pub use json::JsonBackend;
pub use sqlite::SqliteBackend;

/// File name of the SQLite database inside the data directory.
pub const SQLITE_FILE_NAME: &str = "context.db";

/// Which storage strategy to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Flat JSON files.
    #[default]
    Json,
    /// Embedded SQLite database.
    Sqlite,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "file" => Ok(Self::Json),
            "sqlite" | "db" => Ok(Self::Sqlite),
            other => Err(ContextError::validation(format!(
                "unknown backend '{other}'; expected json or sqlite"
            ))),
        }
    }
}

/// Where a backend keeps its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendInfo {
    pub kind: BackendKind,
    pub location: PathBuf,
}

/// Aggregate counts across all sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub total_sessions: usize,
    pub total_items: usize,
    /// On-disk footprint in bytes.
    pub storage_size: u64,
}

/// Durable storage for sessions and context items.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Describe the backend and its location.
    fn info(&self) -> BackendInfo;

    /// Create a session and place it at the head of the session list.
    async fn create_session(&self, request: NewSession) -> Result<Session>;

    /// Look up a session by id.
    async fn get_session(&self, id: &str) -> Result<Option<Session>>;

    /// Sessions ordered most-recently-updated first, at most `limit` of them.
    async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>>;

    /// Insert or upsert an item by `(session_id, key)` and refresh the
    /// session's item count and update time in the same operation.
    ///
    /// Fails with [`ContextError::NotFound`] when the session does not exist.
    async fn save_context_item(&self, session_id: &str, request: NewItem) -> Result<ContextItem>;

    /// Items of a session matching `query`, ordered and paginated.
    async fn get_context_items(&self, session_id: &str, query: &ItemQuery)
    -> Result<Vec<ContextItem>>;

    /// Remove one item. Returns whether it existed.
    async fn delete_context_item(&self, session_id: &str, key: &str) -> Result<bool>;

    /// Remove a session together with all of its items.
    async fn delete_session(&self, id: &str) -> Result<bool>;

    /// Keep the `keep` newest sessions, removing older ones with all their
    /// items. Returns the ids of the removed sessions.
    async fn evict_sessions(&self, keep: usize) -> Result<Vec<String>>;

    /// Keep the `keep` most recently inserted items of a session, removing
    /// the rest. Returns how many items were removed.
    async fn evict_items(&self, session_id: &str, keep: usize) -> Result<usize>;

    /// Aggregate counts and storage footprint.
    async fn get_stats(&self) -> Result<StorageStats>;
}

/// Construct the backend selected by `config`.
pub async fn open_backend(config: &KeeperConfig) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.backend {
        BackendKind::Json => Arc::new(JsonBackend::new(&config.data_dir).await?),
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(
            &config.data_dir.join(SQLITE_FILE_NAME),
        )?),
    };
    info!(
        "Opened {} backend at {}",
        config.backend,
        backend.info().location.display()
    );
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("json".parse::<BackendKind>().unwrap(), BackendKind::Json);
        assert_eq!(" SQLite ".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert!("redis".parse::<BackendKind>().is_err());
    }

    #[tokio::test]
    async fn test_open_backend_selects_variant() {
        let temp_dir = TempDir::new().unwrap();

        let config = KeeperConfig::new(temp_dir.path()).with_backend(BackendKind::Sqlite);
        let backend = open_backend(&config).await.unwrap();
        assert_eq!(backend.info().kind, BackendKind::Sqlite);
        assert_eq!(
            backend.info().location,
            temp_dir.path().join(SQLITE_FILE_NAME)
        );

        let config = KeeperConfig::new(temp_dir.path());
        let backend = open_backend(&config).await.unwrap();
        assert_eq!(backend.info().kind, BackendKind::Json);
    }
}
