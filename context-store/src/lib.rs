//! # Memory Keeper Context Store
//!
//! Persistent session and context-item storage. It provides:
//!
//! - **Sessions**: named containers for related context items
//! - **Context Items**: key/value records upserted by key within a session,
//!   with category, priority, channel, privacy flag and metadata
//! - **Queries**: AND-combined filters, stable ordering and pagination
//! - **Storage Backends**: flat JSON files or an embedded SQLite database
//!   behind one [`StorageBackend`] trait
//! - **Context Engine**: implicit current session, retention caps, file
//!   change detection, exports and checkpoints
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Context Engine                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  current session ──► save / get / delete ──► retention caps     │
//! │                              │                                  │
//! │  cache_file / check_file_changed      export / checkpoint       │
//! └──────────────────────────────┬──────────────────────────────────┘
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       dyn StorageBackend                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  JsonBackend ──► query::select        SqliteBackend ──► SQL     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod ids;
pub mod item;
pub mod query;
pub mod session;

pub use backend::{
    BackendInfo, BackendKind, JsonBackend, SqliteBackend, StorageBackend, StorageStats,
    open_backend,
};
pub use config::KeeperConfig;
pub use engine::{ContextEngine, EngineStatus, FileChange};
pub use error::{ContextError, Result, StorageError};
pub use export::{EXPORT_FORMAT_VERSION, ExportDocument, ExportSummary};
pub use item::{Category, ContextItem, NewItem, Priority};
pub use query::{DEFAULT_LIMIT, ItemQuery, MAX_LIMIT, MAX_OFFSET, SortOrder};
pub use session::{NewSession, Session};
