//! Session export documents.
//!
//! An export is a single JSON file holding a session record, all of its
//! items, the export time, and a format version.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{ContextError, Result, StorageError};
use crate::item::ContextItem;
use crate::session::Session;

/// Format version written into every export.
pub const EXPORT_FORMAT_VERSION: &str = "1.0";

/// Contents of an export file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub session: Session,
    pub items: Vec<ContextItem>,
    pub exported_at: DateTime<Utc>,
    pub version: String,
}

impl ExportDocument {
    pub fn new(session: Session, items: Vec<ContextItem>, exported_at: DateTime<Utc>) -> Self {
        Self {
            session,
            items,
            exported_at,
            version: EXPORT_FORMAT_VERSION.to_string(),
        }
    }

    /// Write the document as pretty JSON, creating parent directories.
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::CreateDirectory(format!("{}: {e}", parent.display()))
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)
            .await
            .map_err(|e| StorageError::WriteFile(format!("{}: {e}", temp_path.display())))?;
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StorageError::WriteFile(format!("{}: {e}", path.display())))?;
        Ok(())
    }

    /// Load a previously written export.
    pub async fn read_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StorageError::ReadFile(format!("{}: {e}", path.display())))?;
        let document: Self = serde_json::from_str(&content)
            .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))?;
        if document.version != EXPORT_FORMAT_VERSION {
            return Err(ContextError::validation(format!(
                "unsupported export version '{}'",
                document.version
            )));
        }
        Ok(document)
    }
}

/// Result of writing an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub path: PathBuf,
    pub item_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids;
    use crate::item::NewItem;
    use crate::session::NewSession;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let session = Session::create(NewSession::new("Feature Work")).unwrap();
        let item = ContextItem::create(&session.id, NewItem::new("k", "v"), ids::now());
        let document = ExportDocument::new(session, vec![item], ids::now());

        let path = temp_dir.path().join("out").join("export.json");
        document.write_to(&path).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], "1.0");
        assert!(raw.get("exportedAt").is_some());

        let loaded = ExportDocument::read_from(&path).await.unwrap();
        assert_eq!(loaded, document);
    }

    #[tokio::test]
    async fn test_garbage_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ExportDocument::read_from(&path).await.unwrap_err();
        assert!(matches!(err, ContextError::Storage(StorageError::Corrupt(_))));
    }
}
