//! Context engine: session lifecycle and item operations on top of a
//! [`StorageBackend`].
//!
//! The engine owns the process-local "current session" pointer. Calls that
//! do not name a session act on the current one; when there is none yet the
//! engine creates `"<project> Auto Session"` once and adopts it. The pointer
//! is never persisted, so each process starts without one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::backend::{self, BackendInfo, StorageBackend};
use crate::config::KeeperConfig;
use crate::error::{ContextError, Result};
use crate::export::{ExportDocument, ExportSummary};
use crate::ids;
use crate::item::{Category, ContextItem, NewItem, Priority};
use crate::query::{ItemQuery, MAX_LIMIT};
use crate::session::{self, NewSession, Session};

/// Outcome of comparing a file's content against its cached digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    /// True when there is no cache entry or the digests differ.
    pub changed: bool,
    pub current_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
}

/// Read-only diagnostic snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub current_session: Option<Session>,
    pub total_sessions: usize,
    pub total_items: usize,
    pub storage_size: u64,
    pub backend: BackendInfo,
}

/// Payload stored as the value of a file-cache item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FileCacheEntry {
    path: String,
    content: String,
    hash: String,
    size: usize,
}

/// Orchestrates sessions and context items.
pub struct ContextEngine {
    backend: Arc<dyn StorageBackend>,
    config: KeeperConfig,
    current: RwLock<Option<String>>,
}

impl ContextEngine {
    pub fn new(backend: Arc<dyn StorageBackend>, config: KeeperConfig) -> Self {
        Self {
            backend,
            config,
            current: RwLock::new(None),
        }
    }

    /// Open the backend selected by `config` and wrap it in an engine.
    pub async fn open(config: KeeperConfig) -> Result<Self> {
        config.validate()?;
        let backend = backend::open_backend(&config).await?;
        Ok(Self::new(backend, config))
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Create a session, make it current, and apply the session retention cap.
    ///
    /// When no branch is given and the project directory is a git checkout,
    /// the checked-out branch is recorded.
    pub async fn start_session(&self, mut request: NewSession) -> Result<Session> {
        request.validate()?;
        if request.branch.is_none() {
            if let Some(dir) = &request.project_dir {
                request.branch = session::detect_branch(Path::new(dir)).await;
            }
        }

        let mut current = self.current.write().await;
        let session = self.create_session(request).await?;
        *current = Some(session.id.clone());

        info!("Started session {} ({})", session.id, session.name);
        Ok(session)
    }

    /// Adopt an existing session as current.
    pub async fn resume_session(&self, id: &str) -> Result<Session> {
        let session = self.require_session(id).await?;
        *self.current.write().await = Some(session.id.clone());
        debug!("Resumed session {}", session.id);
        Ok(session)
    }

    /// Adopt the most recently updated session, if there is one.
    pub async fn resume_latest(&self) -> Result<Option<Session>> {
        let Some(latest) = self.backend.list_sessions(1).await?.into_iter().next() else {
            return Ok(None);
        };
        *self.current.write().await = Some(latest.id.clone());
        debug!("Resumed latest session {}", latest.id);
        Ok(Some(latest))
    }

    /// The current session, if one is active.
    pub async fn current_session(&self) -> Result<Option<Session>> {
        let current = self.current.read().await.clone();
        match current {
            Some(id) => self.backend.get_session(&id).await,
            None => Ok(None),
        }
    }

    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        if limit == 0 {
            return Err(ContextError::validation("limit must be at least 1"));
        }
        self.backend.list_sessions(limit).await
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        self.backend.get_session(id).await
    }

    /// Save (insert or upsert) an item, then apply the per-session item cap.
    ///
    /// Items saved without a channel take the session's default channel.
    pub async fn save(
        &self,
        session_id: Option<&str>,
        mut request: NewItem,
    ) -> Result<ContextItem> {
        request.validate()?;
        let session = self.resolve_session(session_id).await?;
        if request.channel.is_none() {
            request.channel = session.default_channel.clone();
        }

        let item = self.backend.save_context_item(&session.id, request).await?;

        let evicted = self
            .backend
            .evict_items(&session.id, self.config.max_items_per_session)
            .await?;
        if evicted > 0 {
            info!(
                "Evicted {evicted} oldest items from session {} (cap {})",
                session.id, self.config.max_items_per_session
            );
        }
        Ok(item)
    }

    /// Items of a session matching `query`.
    pub async fn get(
        &self,
        session_id: Option<&str>,
        query: &ItemQuery,
    ) -> Result<Vec<ContextItem>> {
        query.validate()?;
        let session = self.resolve_session(session_id).await?;
        self.backend.get_context_items(&session.id, query).await
    }

    /// Remove one item by key. Returns whether it existed.
    pub async fn delete(&self, session_id: Option<&str>, key: &str) -> Result<bool> {
        if key.trim().is_empty() {
            return Err(ContextError::validation("key must not be empty"));
        }
        let session = self.resolve_session(session_id).await?;
        self.backend.delete_context_item(&session.id, key).await
    }

    /// Store `content` as the cached version of `path`. Returns its digest.
    pub async fn cache_file(
        &self,
        session_id: Option<&str>,
        path: &str,
        content: &str,
    ) -> Result<String> {
        if path.trim().is_empty() {
            return Err(ContextError::validation("file path must not be empty"));
        }
        let hash = ids::content_hash(content);
        let entry = FileCacheEntry {
            path: path.to_string(),
            content: content.to_string(),
            hash: hash.clone(),
            size: content.len(),
        };
        let request = NewItem::new(ids::file_cache_key(path), serde_json::to_string(&entry)?)
            .with_category(Category::Note)
            .with_priority(Priority::Low)
            .with_metadata(serde_json::json!({
                "path": entry.path,
                "hash": entry.hash,
                "size": entry.size,
            }))
            .private();

        self.save(session_id, request).await?;
        debug!("Cached {path} ({hash})");
        Ok(hash)
    }

    /// Compare `content` with the cached digest of `path`.
    pub async fn check_file_changed(
        &self,
        session_id: Option<&str>,
        path: &str,
        content: &str,
    ) -> Result<FileChange> {
        let current_hash = ids::content_hash(content);
        let query = ItemQuery::new().with_key(ids::file_cache_key(path));
        let cached = self.get(session_id, &query).await?.into_iter().next();

        // A value that is not a cache entry counts as never cached.
        let previous_hash = cached.and_then(|item| {
            match serde_json::from_str::<FileCacheEntry>(&item.value) {
                Ok(entry) => Some(entry.hash),
                Err(e) => {
                    warn!("Ignoring unreadable file cache entry for {path}: {e}");
                    None
                }
            }
        });

        Ok(FileChange {
            changed: previous_hash.as_deref() != Some(current_hash.as_str()),
            current_hash,
            previous_hash,
        })
    }

    /// Write a session and all of its items to a single JSON file.
    ///
    /// Without a session id the current session is exported. Without an
    /// output path the file goes to `<data_dir>/exports/`.
    pub async fn export(
        &self,
        session_id: Option<&str>,
        output_path: Option<&Path>,
    ) -> Result<ExportSummary> {
        let session = self.existing_session(session_id).await?;
        let exported_at = ids::now();
        let path = match output_path {
            Some(path) => path.to_path_buf(),
            None => self.config.exports_dir().join(format!(
                "{}-{}.json",
                session.id,
                file_timestamp(exported_at)
            )),
        };
        self.write_export(session, exported_at, path).await
    }

    /// Write a named snapshot of a session under `<data_dir>/checkpoints/`.
    pub async fn checkpoint(&self, name: &str, session_id: Option<&str>) -> Result<ExportSummary> {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(ContextError::validation("checkpoint name must not be empty"));
        }
        let session = self.existing_session(session_id).await?;
        let exported_at = ids::now();
        let path = self
            .config
            .checkpoints_dir()
            .join(format!("{slug}-{}.json", file_timestamp(exported_at)));
        self.write_export(session, exported_at, path).await
    }

    /// Current session, aggregate counts, and backend location.
    pub async fn status(&self) -> Result<EngineStatus> {
        let stats = self.backend.get_stats().await?;
        Ok(EngineStatus {
            current_session: self.current_session().await?,
            total_sessions: stats.total_sessions,
            total_items: stats.total_items,
            storage_size: stats.storage_size,
            backend: self.backend.info(),
        })
    }

    async fn create_session(&self, request: NewSession) -> Result<Session> {
        let session = self.backend.create_session(request).await?;
        let evicted = self.backend.evict_sessions(self.config.max_sessions).await?;
        if !evicted.is_empty() {
            info!(
                "Evicted {} oldest sessions (cap {})",
                evicted.len(),
                self.config.max_sessions
            );
        }
        Ok(session)
    }

    async fn require_session(&self, id: &str) -> Result<Session> {
        self.backend
            .get_session(id)
            .await?
            .ok_or_else(|| ContextError::NotFound(format!("session {id}")))
    }

    /// Session for a read or write that may omit the id, auto-creating one
    /// when there is no current session.
    async fn resolve_session(&self, session_id: Option<&str>) -> Result<Session> {
        if let Some(id) = session_id {
            return self.require_session(id).await;
        }

        let mut current = self.current.write().await;
        if let Some(id) = current.as_deref() {
            return self.require_session(id).await;
        }

        let name = format!("{} Auto Session", self.config.project_name);
        let project_dir = std::env::current_dir()
            .ok()
            .map(|dir| dir.to_string_lossy().into_owned());
        let mut request = NewSession::new(name);
        request.project_dir = project_dir;
        let session = self.create_session(request).await?;
        *current = Some(session.id.clone());

        info!("Auto-created session {} ({})", session.id, session.name);
        Ok(session)
    }

    /// Session for a read-only operation: never auto-creates.
    async fn existing_session(&self, session_id: Option<&str>) -> Result<Session> {
        match session_id {
            Some(id) => self.require_session(id).await,
            None => self
                .current_session()
                .await?
                .ok_or_else(|| ContextError::NotFound("no active session".to_string())),
        }
    }

    async fn write_export(
        &self,
        session: Session,
        exported_at: chrono::DateTime<chrono::Utc>,
        path: PathBuf,
    ) -> Result<ExportSummary> {
        let items = self.all_items(&session.id).await?;
        if items.len() != session.item_count {
            warn!(
                "Session {} reports {} items but {} were read",
                session.id,
                session.item_count,
                items.len()
            );
        }

        let item_count = items.len();
        ExportDocument::new(session, items, exported_at)
            .write_to(&path)
            .await?;

        info!("Exported {item_count} items to {}", path.display());
        Ok(ExportSummary { path, item_count })
    }

    /// Every item of a session in storage order.
    async fn all_items(&self, session_id: &str) -> Result<Vec<ContextItem>> {
        let mut items = Vec::new();
        loop {
            let query = ItemQuery::new().page(items.len(), MAX_LIMIT);
            let page = self.backend.get_context_items(session_id, &query).await?;
            let done = page.len() < MAX_LIMIT;
            items.extend(page);
            if done {
                return Ok(items);
            }
        }
    }
}

fn file_timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y%m%dT%H%M%S%3fZ").to_string()
}

fn slugify(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::JsonBackend;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn engine(temp_dir: &TempDir) -> ContextEngine {
        let config = KeeperConfig::new(temp_dir.path()).with_project_name("casino");
        let backend = Arc::new(JsonBackend::new(temp_dir.path()).await.unwrap());
        ContextEngine::new(backend, config)
    }

    #[tokio::test]
    async fn test_auto_session_created_once() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir).await;
        assert!(engine.current_session().await.unwrap().is_none());

        let first = engine.save(None, NewItem::new("a", "1")).await.unwrap();
        let second = engine.save(None, NewItem::new("b", "2")).await.unwrap();
        assert_eq!(first.session_id, second.session_id);

        let sessions = engine.list_sessions(10).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "casino Auto Session");
        assert_eq!(sessions[0].item_count, 2);
    }

    #[tokio::test]
    async fn test_validation_precedes_auto_session() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir).await;

        let err = engine.save(None, NewItem::new("", "v")).await.unwrap_err();
        assert!(matches!(err, ContextError::Validation(_)));
        assert!(engine.list_sessions(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_start_supersedes_current() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir).await;

        let first = engine.start_session(NewSession::new("one")).await.unwrap();
        let second = engine
            .start_session(NewSession::new("two").with_default_channel("backend"))
            .await
            .unwrap();
        assert_eq!(engine.current_session().await.unwrap().unwrap().id, second.id);

        let item = engine.save(None, NewItem::new("k", "v")).await.unwrap();
        assert_eq!(item.session_id, second.id);
        assert_eq!(item.channel.as_deref(), Some("backend"));

        engine
            .save(Some(&first.id), NewItem::new("old", "still valid"))
            .await
            .unwrap();
        let resumed = engine.resume_session(&first.id).await.unwrap();
        assert_eq!(resumed.item_count, 1);
        assert_eq!(engine.current_session().await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_unknown_explicit_session_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir).await;

        let err = engine
            .save(Some("missing"), NewItem::new("k", "v"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::NotFound(_)));
        assert!(matches!(
            engine.resume_session("missing").await,
            Err(ContextError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_start_session_records_branch() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("project");
        std::fs::create_dir_all(project.join(".git")).unwrap();
        std::fs::write(project.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();

        let engine = engine(&temp_dir).await;
        let session = engine
            .start_session(NewSession::new("s").with_project_dir(project.to_string_lossy()))
            .await
            .unwrap();
        assert_eq!(session.branch.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn test_file_change_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir).await;

        let unknown = engine
            .check_file_changed(None, "src/app.vue", "<template/>")
            .await
            .unwrap();
        assert!(unknown.changed);
        assert_eq!(unknown.previous_hash, None);

        let hash = engine
            .cache_file(None, "src/app.vue", "<template/>")
            .await
            .unwrap();
        let same = engine
            .check_file_changed(None, "src/app.vue", "<template/>")
            .await
            .unwrap();
        assert!(!same.changed);
        assert_eq!(same.current_hash, hash);

        let edited = engine
            .check_file_changed(None, "src/app.vue", "<template><div/></template>")
            .await
            .unwrap();
        assert!(edited.changed);
        assert_eq!(edited.previous_hash, Some(hash));

        let cached = engine
            .get(None, &ItemQuery::new().with_key("file_cache:src/app.vue"))
            .await
            .unwrap();
        assert_eq!(cached.len(), 1);
        assert!(cached[0].private);
        assert_eq!(cached[0].category, Some(Category::Note));
        assert_eq!(cached[0].priority, Priority::Low);
    }

    #[tokio::test]
    async fn test_empty_file_can_be_cached() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir).await;

        engine.cache_file(None, "empty.txt", "").await.unwrap();
        let change = engine
            .check_file_changed(None, "empty.txt", "")
            .await
            .unwrap();
        assert!(!change.changed);
    }

    #[tokio::test]
    async fn test_plain_value_under_cache_key_reads_as_uncached() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir).await;

        engine
            .save(None, NewItem::new(ids::file_cache_key("notes.md"), "hand written"))
            .await
            .unwrap();
        let change = engine
            .check_file_changed(None, "notes.md", "# notes")
            .await
            .unwrap();
        assert!(change.changed);
        assert_eq!(change.previous_hash, None);

        engine.cache_file(None, "notes.md", "# notes").await.unwrap();
        let change = engine
            .check_file_changed(None, "notes.md", "# notes")
            .await
            .unwrap();
        assert!(!change.changed);
    }

    #[tokio::test]
    async fn test_item_cap_evicts_oldest() {
        let temp_dir = TempDir::new().unwrap();
        let config = KeeperConfig::new(temp_dir.path()).with_max_items_per_session(3);
        let backend = Arc::new(JsonBackend::new(temp_dir.path()).await.unwrap());
        let engine = ContextEngine::new(backend, config);

        for i in 0..5 {
            let priority = if i == 0 { Priority::Critical } else { Priority::Low };
            engine
                .save(None, NewItem::new(format!("k{i}"), "v").with_priority(priority))
                .await
                .unwrap();
        }

        let items = engine.get(None, &ItemQuery::new()).await.unwrap();
        let keys: Vec<_> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["k4", "k3", "k2"]);
        assert_eq!(engine.current_session().await.unwrap().unwrap().item_count, 3);
    }

    #[tokio::test]
    async fn test_export_and_checkpoint_paths() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir).await;

        assert!(matches!(
            engine.export(None, None).await,
            Err(ContextError::NotFound(_))
        ));

        engine.start_session(NewSession::new("s")).await.unwrap();
        engine.save(None, NewItem::new("k", "v")).await.unwrap();

        let summary = engine.export(None, None).await.unwrap();
        assert_eq!(summary.item_count, 1);
        assert!(summary.path.starts_with(temp_dir.path().join("exports")));

        let checkpoint = engine.checkpoint("before refactor", None).await.unwrap();
        assert!(checkpoint.path.starts_with(temp_dir.path().join("checkpoints")));
        let file_name = checkpoint.path.file_name().unwrap().to_string_lossy();
        assert!(file_name.starts_with("before_refactor-"));

        assert!(matches!(
            engine.checkpoint("  ", None).await,
            Err(ContextError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir).await;

        let status = engine.status().await.unwrap();
        assert_eq!(status.current_session, None);
        assert_eq!(status.total_sessions, 0);

        engine.save(None, NewItem::new("k", "v")).await.unwrap();
        let status = engine.status().await.unwrap();
        assert_eq!(status.total_sessions, 1);
        assert_eq!(status.total_items, 1);
        assert!(status.current_session.is_some());
        assert_eq!(status.backend.location, temp_dir.path().to_path_buf());
    }
}
