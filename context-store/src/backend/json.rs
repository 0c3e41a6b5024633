//! Flat-file storage backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! sessions.json              sessions, newest first
//! contexts/<session_id>.json that session's items, newest inserted first
//! ```
//!
//! Every write replaces a whole file atomically through a temp file. Queries
//! load a session's item file fully and run [`crate::query::select`] over it.
//!
//! Writes are serialised inside one process only. Two processes writing the
//! same directory can lose updates; one writer at a time is assumed.
//!
//! An item write renames the item file before the sessions manifest. If the
//! manifest write fails, the item is stored but the session's `item_count`
//! and `updated_at` stay stale until the next successful write to that session.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{BackendInfo, BackendKind, StorageBackend, StorageStats};
use crate::error::{ContextError, Result, StorageError};
use crate::ids;
use crate::item::{ContextItem, NewItem};
use crate::query::{self, ItemQuery};
use crate::session::{NewSession, Session};

const SESSIONS_FILE: &str = "sessions.json";
const CONTEXTS_DIR: &str = "contexts";

/// Storage backend keeping sessions and items in JSON files.
pub struct JsonBackend {
    /// Root directory for all files.
    root: PathBuf,

    /// Serialises read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonBackend {
    /// Open (or initialise) a store rooted at `root`.
    ///
    /// This will create the directories if they don't exist.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let contexts = root.join(CONTEXTS_DIR);

        fs::create_dir_all(&contexts)
            .await
            .map_err(|e| StorageError::CreateDirectory(format!("{}: {e}", contexts.display())))?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn sessions_path(&self) -> PathBuf {
        self.root.join(SESSIONS_FILE)
    }

    fn items_path(&self, session_id: &str) -> PathBuf {
        self.root.join(CONTEXTS_DIR).join(format!("{session_id}.json"))
    }

    async fn load_sessions(&self) -> Result<Vec<Session>> {
        read_json(&self.sessions_path()).await
    }

    async fn store_sessions(&self, sessions: &[Session]) -> Result<()> {
        write_json(&self.sessions_path(), &sessions).await
    }

    async fn load_items(&self, session_id: &str) -> Result<Vec<ContextItem>> {
        read_json(&self.items_path(session_id)).await
    }

    async fn store_items(&self, session_id: &str, items: &[ContextItem]) -> Result<()> {
        write_json(&self.items_path(session_id), &items).await
    }

    /// Update the cached count (and optionally the update time) of a session.
    async fn refresh_session(
        &self,
        session_id: &str,
        item_count: usize,
        touched_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        let mut sessions = self.load_sessions().await?;
        if let Some(session) = sessions.iter_mut().find(|s| s.id == session_id) {
            let at = touched_at.unwrap_or(session.updated_at);
            session.touch(item_count, at);
            self.store_sessions(&sessions).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for JsonBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            kind: BackendKind::Json,
            location: self.root.clone(),
        }
    }

    async fn create_session(&self, request: NewSession) -> Result<Session> {
        let session = Session::create(request)?;

        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load_sessions().await?;
        sessions.insert(0, session.clone());
        self.store_sessions(&sessions).await?;

        debug!("Created session {} ({})", session.id, session.name);
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let sessions = self.load_sessions().await?;
        Ok(sessions.into_iter().find(|s| s.id == id))
    }

    async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        let mut sessions = self.load_sessions().await?;
        sessions.sort_by_key(|s| std::cmp::Reverse(s.updated_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn save_context_item(&self, session_id: &str, request: NewItem) -> Result<ContextItem> {
        request.validate()?;

        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load_sessions().await?;
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| ContextError::NotFound(format!("session {session_id}")))?;

        let mut items = self.load_items(session_id).await?;
        let now = ids::now();
        let saved = match items.iter_mut().find(|i| i.key == request.key) {
            Some(existing) => {
                existing.overwrite(request, now);
                existing.clone()
            }
            None => {
                let item = ContextItem::create(session_id, request, now);
                items.insert(0, item.clone());
                item
            }
        };
        self.store_items(session_id, &items).await?;

        session.touch(items.len(), now);
        self.store_sessions(&sessions).await?;

        debug!("Saved item {} in session {session_id}", saved.key);
        Ok(saved)
    }

    async fn get_context_items(
        &self,
        session_id: &str,
        query: &ItemQuery,
    ) -> Result<Vec<ContextItem>> {
        query.validate()?;
        let items = self.load_items(session_id).await?;
        query::select(items, query)
    }

    async fn delete_context_item(&self, session_id: &str, key: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load_items(session_id).await?;
        let Some(index) = items.iter().position(|i| i.key == key) else {
            return Ok(false);
        };
        items.remove(index);
        self.store_items(session_id, &items).await?;
        self.refresh_session(session_id, items.len(), Some(ids::now()))
            .await?;

        debug!("Deleted item {key} from session {session_id}");
        Ok(true)
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load_sessions().await?;
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        if sessions.len() == before {
            return Ok(false);
        }
        self.store_sessions(&sessions).await?;
        remove_file_if_exists(&self.items_path(id)).await?;

        info!("Deleted session {id}");
        Ok(true)
    }

    async fn evict_sessions(&self, keep: usize) -> Result<Vec<String>> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load_sessions().await?;
        if sessions.len() <= keep {
            return Ok(Vec::new());
        }

        let evicted = sessions.split_off(keep);
        self.store_sessions(&sessions).await?;

        let mut evicted_ids = Vec::with_capacity(evicted.len());
        for session in evicted {
            remove_file_if_exists(&self.items_path(&session.id)).await?;
            evicted_ids.push(session.id);
        }
        Ok(evicted_ids)
    }

    async fn evict_items(&self, session_id: &str, keep: usize) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load_items(session_id).await?;
        if items.len() <= keep {
            return Ok(0);
        }

        let evicted = items.len() - keep;
        items.truncate(keep);
        self.store_items(session_id, &items).await?;
        self.refresh_session(session_id, items.len(), None).await?;
        Ok(evicted)
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        let sessions = self.load_sessions().await?;
        let storage_size = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| entry.metadata().ok())
            .filter(std::fs::Metadata::is_file)
            .map(|metadata| metadata.len())
            .sum();

        Ok(StorageStats {
            total_sessions: sessions.len(),
            total_items: sessions.iter().map(|s| s.item_count).sum(),
            storage_size,
        })
    }
}

/// Read a JSON document, treating a missing file as empty.
async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => {
            return Err(StorageError::ReadFile(format!("{}: {e}", path.display())).into());
        }
    };

    serde_json::from_str(&content)
        .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())).into())
}

/// Write a JSON document atomically using a temp file.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, &content)
        .await
        .map_err(|e| StorageError::WriteFile(format!("{}: {e}", temp_path.display())))?;

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| StorageError::WriteFile(format!("{}: {e}", path.display())))?;

    Ok(())
}

async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::DeleteFile(format!("{}: {e}", path.display())).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_layout_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let backend = JsonBackend::new(temp_dir.path()).await.unwrap();

        let session = backend
            .create_session(NewSession::new("Feature Work"))
            .await
            .unwrap();
        backend
            .save_context_item(&session.id, NewItem::new("task1", "implement X"))
            .await
            .unwrap();

        assert!(temp_dir.path().join("sessions.json").is_file());
        let items_file = temp_dir
            .path()
            .join("contexts")
            .join(format!("{}.json", session.id));
        let stored: Vec<ContextItem> =
            serde_json::from_str(&std::fs::read_to_string(items_file).unwrap()).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].key, "task1");
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();

        let session_id = {
            let backend = JsonBackend::new(temp_dir.path()).await.unwrap();
            let session = backend
                .create_session(NewSession::new("projects"))
                .await
                .unwrap();
            backend
                .save_context_item(&session.id, NewItem::new("k", "v"))
                .await
                .unwrap();
            session.id
        };

        let backend = JsonBackend::new(temp_dir.path()).await.unwrap();
        let session = backend.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.name, "projects");
        assert_eq!(session.item_count, 1);
    }

    #[tokio::test]
    async fn test_corrupt_manifest_is_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        let backend = JsonBackend::new(temp_dir.path()).await.unwrap();
        std::fs::write(temp_dir.path().join("sessions.json"), "{not json").unwrap();

        let err = backend.list_sessions(10).await.unwrap_err();
        assert!(matches!(
            err,
            ContextError::Storage(StorageError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_evict_sessions_removes_item_files() {
        let temp_dir = TempDir::new().unwrap();
        let backend = JsonBackend::new(temp_dir.path()).await.unwrap();

        let oldest = backend.create_session(NewSession::new("a")).await.unwrap();
        backend
            .save_context_item(&oldest.id, NewItem::new("k", "v"))
            .await
            .unwrap();
        backend.create_session(NewSession::new("b")).await.unwrap();

        let evicted = backend.evict_sessions(1).await.unwrap();
        assert_eq!(evicted, vec![oldest.id.clone()]);
        assert!(!backend.items_path(&oldest.id).exists());
        assert_eq!(backend.get_stats().await.unwrap().total_sessions, 1);
    }
}
