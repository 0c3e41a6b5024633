//! SQLite storage backend.
//!
//! One table for sessions and one for context items. Filtering, ordering and
//! pagination are pushed down into SQL and mirror [`crate::query::select`]:
//! every `ORDER BY` ends with `seq DESC`, the insertion sequence of the row,
//! which reproduces the flat-file backend's newest-first storage order for
//! ties. Upserts keep the row (and so its `seq`, `id` and `created_at`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex_lite::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use tracing::{debug, info};

use super::{BackendInfo, BackendKind, StorageBackend, StorageStats};
use crate::error::{ContextError, Result, StorageError};
use crate::ids;
use crate::item::{Category, ContextItem, NewItem, Priority};
use crate::query::{ItemQuery, SortOrder};
use crate::session::{NewSession, Session};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT,
    project_dir TEXT,
    default_channel TEXT,
    branch TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    item_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS context_items (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    category TEXT,
    priority TEXT NOT NULL DEFAULT 'normal',
    metadata TEXT,
    is_private INTEGER NOT NULL DEFAULT 0,
    channel TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(session_id, key)
);

CREATE INDEX IF NOT EXISTS idx_sessions_updated_at ON sessions(updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_context_items_session_id ON context_items(session_id);
CREATE INDEX IF NOT EXISTS idx_context_items_category ON context_items(category);
CREATE INDEX IF NOT EXISTS idx_context_items_priority ON context_items(priority);
CREATE INDEX IF NOT EXISTS idx_context_items_channel ON context_items(channel);
CREATE INDEX IF NOT EXISTS idx_context_items_created_at ON context_items(created_at);
CREATE INDEX IF NOT EXISTS idx_context_items_key ON context_items(key);
";

const SESSION_COLUMNS: &str = "id, name, description, project_dir, default_channel, branch, \
     created_at, updated_at, item_count";

const ITEM_COLUMNS: &str = "id, session_id, key, value, category, priority, metadata, \
     is_private, channel, created_at, updated_at";

/// Storage backend over an embedded SQLite database.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    location: PathBuf,
}

impl SqliteBackend {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::CreateDirectory(format!("{}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        Self::init(conn, path.to_path_buf())
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init(conn, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, location: PathBuf) -> Result<Self> {
        register_regexp(&conn)?;
        conn.execute_batch(SCHEMA)?;
        info!("SQLite context store ready at {}", location.display());
        Ok(Self {
            conn: Mutex::new(conn),
            location,
        })
    }

    /// Run `f` with exclusive access to the connection.
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            kind: BackendKind::Sqlite,
            location: self.location.clone(),
        }
    }

    async fn create_session(&self, request: NewSession) -> Result<Session> {
        let session = Session::create(request)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, name, description, project_dir, default_channel, branch, created_at, updated_at, item_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 0)",
                params![
                    session.id,
                    session.name,
                    session.description,
                    session.project_dir,
                    session.default_channel,
                    session.branch,
                    session.created_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })?;

        debug!("Created session {} ({})", session.id, session.name);
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        self.with_conn(|conn| select_session(conn, id))
    }

    async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY updated_at DESC, seq DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map([limit as i64], row_to_session)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(ContextError::from)
        })
    }

    async fn save_context_item(&self, session_id: &str, request: NewItem) -> Result<ContextItem> {
        request.validate()?;
        let metadata = request
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = ids::now().timestamp_millis();

        let saved = self.with_conn(|conn| {
            let tx = conn.transaction()?;

            let exists = tx
                .prepare("SELECT 1 FROM sessions WHERE id = ?1")?
                .exists([session_id])?;
            if !exists {
                return Err(ContextError::NotFound(format!("session {session_id}")));
            }

            tx.execute(
                "INSERT INTO context_items (id, session_id, key, value, category, priority, metadata, is_private, channel, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                 ON CONFLICT(session_id, key) DO UPDATE SET
                   value = excluded.value,
                   category = excluded.category,
                   priority = excluded.priority,
                   metadata = excluded.metadata,
                   is_private = excluded.is_private,
                   channel = excluded.channel,
                   updated_at = excluded.updated_at",
                params![
                    ids::generate_id(),
                    session_id,
                    request.key,
                    request.value,
                    request.category.map(|c| c.as_str()),
                    request.priority.unwrap_or_default().as_str(),
                    metadata,
                    request.private,
                    request.channel,
                    now,
                ],
            )?;

            refresh_session(&tx, session_id, Some(now))?;

            let item = tx.query_row(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM context_items WHERE session_id = ?1 AND key = ?2"
                ),
                params![session_id, request.key],
                row_to_item,
            )?;

            tx.commit()?;
            Ok(item)
        })?;

        debug!("Saved item {} in session {session_id}", saved.key);
        Ok(saved)
    }

    async fn get_context_items(
        &self,
        session_id: &str,
        query: &ItemQuery,
    ) -> Result<Vec<ContextItem>> {
        let key_pattern = query.validate()?;

        let mut sql = format!("SELECT {ITEM_COLUMNS} FROM context_items WHERE session_id = ?");
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(session_id.to_string())];

        if let Some(key) = &query.key {
            sql.push_str(" AND key = ?");
            params.push(Box::new(key.clone()));
        }
        if let Some(keys) = &query.keys {
            push_in_clause(&mut sql, &mut params, "key", keys.iter().cloned());
        }
        if let Some(category) = query.category {
            sql.push_str(" AND category = ?");
            params.push(Box::new(category.as_str()));
        }
        if let Some(categories) = &query.categories {
            push_in_clause(
                &mut sql,
                &mut params,
                "category",
                categories.iter().map(|c| c.as_str().to_string()),
            );
        }
        if let Some(priority) = query.priority {
            sql.push_str(" AND priority = ?");
            params.push(Box::new(priority.as_str()));
        }
        if let Some(priorities) = &query.priorities {
            push_in_clause(
                &mut sql,
                &mut params,
                "priority",
                priorities.iter().map(|p| p.as_str().to_string()),
            );
        }
        if let Some(channel) = &query.channel {
            sql.push_str(" AND channel = ?");
            params.push(Box::new(channel.clone()));
        }
        if let Some(private) = query.private {
            sql.push_str(" AND is_private = ?");
            params.push(Box::new(private));
        }
        if let Some(after) = query.created_after {
            sql.push_str(" AND created_at > ?");
            params.push(Box::new(after.timestamp_millis()));
        }
        if let Some(before) = query.created_before {
            sql.push_str(" AND created_at < ?");
            params.push(Box::new(before.timestamp_millis()));
        }
        if let Some(pattern) = key_pattern {
            sql.push_str(" AND key REGEXP ?");
            params.push(Box::new(pattern.as_str().to_string()));
        }

        sql.push_str(" ORDER BY ");
        sql.push_str(order_clause(query.sort));
        sql.push_str(" LIMIT ? OFFSET ?");
        params.push(Box::new(query.limit as i64));
        params.push(Box::new(query.offset as i64));

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let params_refs: Vec<&dyn ToSql> = params.iter().map(|b| b.as_ref()).collect();
            let rows = stmt.query_map(params_refs.as_slice(), row_to_item)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(ContextError::from)
        })
    }

    async fn delete_context_item(&self, session_id: &str, key: &str) -> Result<bool> {
        let deleted = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let rows = tx.execute(
                "DELETE FROM context_items WHERE session_id = ?1 AND key = ?2",
                params![session_id, key],
            )?;
            if rows > 0 {
                refresh_session(&tx, session_id, Some(ids::now().timestamp_millis()))?;
            }
            tx.commit()?;
            Ok(rows > 0)
        })?;

        if deleted {
            debug!("Deleted item {key} from session {session_id}");
        }
        Ok(deleted)
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        let deleted = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM context_items WHERE session_id = ?1", [id])?;
            let rows = tx.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(rows > 0)
        })?;

        if deleted {
            info!("Deleted session {id}");
        }
        Ok(deleted)
    }

    async fn evict_sessions(&self, keep: usize) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let evicted: Vec<String> = {
                let mut stmt =
                    tx.prepare("SELECT id FROM sessions ORDER BY seq DESC LIMIT -1 OFFSET ?1")?;
                let rows = stmt.query_map([keep as i64], |row| row.get(0))?;
                rows.collect::<std::result::Result<_, _>>()?
            };
            for id in &evicted {
                tx.execute("DELETE FROM context_items WHERE session_id = ?1", [id])?;
                tx.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
            }
            tx.commit()?;
            Ok(evicted)
        })
    }

    async fn evict_items(&self, session_id: &str, keep: usize) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let rows = tx.execute(
                "DELETE FROM context_items
                 WHERE session_id = ?1 AND seq NOT IN (
                   SELECT seq FROM context_items WHERE session_id = ?1 ORDER BY seq DESC LIMIT ?2
                 )",
                params![session_id, keep as i64],
            )?;
            if rows > 0 {
                refresh_session(&tx, session_id, None)?;
            }
            tx.commit()?;
            Ok(rows)
        })
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        self.with_conn(|conn| {
            let total_sessions: i64 =
                conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
            let total_items: i64 =
                conn.query_row("SELECT COUNT(*) FROM context_items", [], |row| row.get(0))?;
            let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
            let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;

            Ok(StorageStats {
                total_sessions: total_sessions as usize,
                total_items: total_items as usize,
                storage_size: (page_count * page_size) as u64,
            })
        })
    }
}

/// Register `regexp(pattern, text)` so `key REGEXP ?` works in queries.
fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let regex: Arc<Regex> =
                ctx.get_or_create_aux(0, |vr| -> std::result::Result<_, BoxError> {
                    Ok(Regex::new(vr.as_str()?)?)
                })?;
            let text = ctx
                .get_raw(1)
                .as_str()
                .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            Ok(regex.is_match(text))
        },
    )?;
    Ok(())
}

/// Recount a session's items and optionally bump its update time.
fn refresh_session(conn: &Connection, session_id: &str, touched_at: Option<i64>) -> Result<()> {
    conn.execute(
        "UPDATE sessions
         SET item_count = (SELECT COUNT(*) FROM context_items WHERE session_id = ?1),
             updated_at = COALESCE(?2, updated_at)
         WHERE id = ?1",
        params![session_id, touched_at],
    )?;
    Ok(())
}

fn select_session(conn: &Connection, id: &str) -> Result<Option<Session>> {
    let session = conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            [id],
            row_to_session,
        )
        .optional()?;
    Ok(session)
}

fn order_clause(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::CreatedAsc => "created_at ASC, seq DESC",
        SortOrder::CreatedDesc => "created_at DESC, seq DESC",
        SortOrder::UpdatedAsc => "updated_at ASC, seq DESC",
        SortOrder::UpdatedDesc => "updated_at DESC, seq DESC",
        SortOrder::Priority => {
            "CASE priority WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'normal' THEN 2 ELSE 3 END ASC, seq DESC"
        }
    }
}

/// Append `AND column IN (?, ...)`; an empty set matches nothing.
fn push_in_clause(
    sql: &mut String,
    params: &mut Vec<Box<dyn ToSql>>,
    column: &str,
    values: impl Iterator<Item = String>,
) {
    let before = params.len();
    for value in values {
        params.push(Box::new(value));
    }
    let count = params.len() - before;
    if count == 0 {
        sql.push_str(" AND 0");
        return;
    }
    let placeholders = vec!["?"; count].join(", ");
    sql.push_str(&format!(" AND {column} IN ({placeholders})"));
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        project_dir: row.get(3)?,
        default_channel: row.get(4)?,
        branch: row.get(5)?,
        created_at: ids::from_millis(row.get(6)?),
        updated_at: ids::from_millis(row.get(7)?),
        item_count: row.get::<_, i64>(8)? as usize,
    })
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<ContextItem> {
    let category = row
        .get::<_, Option<String>>(4)?
        .map(|c| c.parse::<Category>())
        .transpose()
        .map_err(|e: ContextError| conversion_error(4, e))?;
    let priority = row
        .get::<_, String>(5)?
        .parse::<Priority>()
        .map_err(|e: ContextError| conversion_error(5, e))?;
    let metadata = row
        .get::<_, Option<String>>(6)?
        .map(|m| serde_json::from_str(&m))
        .transpose()
        .map_err(|e| conversion_error(6, e))?;

    Ok(ContextItem {
        id: row.get(0)?,
        session_id: row.get(1)?,
        key: row.get(2)?,
        value: row.get(3)?,
        category,
        priority,
        metadata,
        private: row.get(7)?,
        channel: row.get(8)?,
        created_at: ids::from_millis(row.get(9)?),
        updated_at: ids::from_millis(row.get(10)?),
    })
}

fn conversion_error(column: usize, err: impl Into<BoxError>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, err.into())
}
