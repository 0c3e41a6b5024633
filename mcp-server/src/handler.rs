//! Tool-call dispatch onto the context engine.
//!
//! Every tool returns `{"success": true, ...}` or
//! `{"success": false, "message": ..., "kind": ...}`. Engine errors are
//! reported as tool results, not as JSON-RPC errors.

use std::sync::Arc;

use keeper_context_store::{ContextEngine, ContextError, ItemQuery, NewItem, NewSession, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::tools;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionListArgs {
    #[serde(default = "default_session_limit")]
    limit: usize,
}

fn default_session_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveArgs {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(flatten)]
    item: NewItem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetArgs {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(flatten)]
    query: ItemQuery,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteArgs {
    #[serde(default)]
    session_id: Option<String>,
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointArgs {
    #[serde(default)]
    session_id: Option<String>,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileArgs {
    #[serde(default)]
    session_id: Option<String>,
    file_path: String,
    content: String,
}

/// Executes tool calls against a shared engine.
pub struct ToolHandler {
    engine: Arc<ContextEngine>,
}

impl ToolHandler {
    pub fn new(engine: Arc<ContextEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &ContextEngine {
        &self.engine
    }

    /// Whether `name` is a known tool.
    pub fn has_tool(name: &str) -> bool {
        tools::TOOL_NAMES.contains(&name)
    }

    /// Run a tool and produce its structured result.
    ///
    /// Returns `None` for an unknown tool name.
    pub async fn call(&self, name: &str, arguments: Option<Value>) -> Option<Value> {
        if !Self::has_tool(name) {
            return None;
        }
        let arguments = arguments.unwrap_or_else(|| json!({}));
        debug!("Calling tool {name}");

        let result = match self.dispatch(name, arguments).await {
            Ok(Value::Object(mut fields)) => {
                fields.insert("success".to_string(), Value::Bool(true));
                Value::Object(fields)
            }
            Ok(other) => json!({ "success": true, "result": other }),
            Err(e) => {
                warn!("Tool {name} failed: {e}");
                json!({
                    "success": false,
                    "message": e.to_string(),
                    "kind": e.kind(),
                })
            }
        };
        Some(result)
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> Result<Value> {
        let engine = &self.engine;
        match name {
            tools::SESSION_START => {
                let request: NewSession = parse_args(arguments)?;
                let session = engine.start_session(request).await?;
                Ok(json!({ "session": session }))
            }
            tools::SESSION_LIST => {
                let args: SessionListArgs = parse_args(arguments)?;
                let sessions = engine.list_sessions(args.limit).await?;
                Ok(json!({ "sessions": sessions }))
            }
            tools::SAVE => {
                let args: SaveArgs = parse_args(arguments)?;
                let item = engine.save(args.session_id.as_deref(), args.item).await?;
                Ok(json!({ "item": item }))
            }
            tools::GET => {
                let args: GetArgs = parse_args(arguments)?;
                let items = engine.get(args.session_id.as_deref(), &args.query).await?;
                Ok(json!({ "count": items.len(), "items": items }))
            }
            tools::DELETE => {
                let args: DeleteArgs = parse_args(arguments)?;
                let deleted = engine.delete(args.session_id.as_deref(), &args.key).await?;
                Ok(json!({ "deleted": deleted }))
            }
            tools::STATUS => {
                let status = engine.status().await?;
                Ok(json!({ "status": status }))
            }
            tools::CHECKPOINT => {
                let args: CheckpointArgs = parse_args(arguments)?;
                let summary = engine
                    .checkpoint(&args.name, args.session_id.as_deref())
                    .await?;
                Ok(serde_json::to_value(summary)?)
            }
            tools::CACHE_FILE => {
                let args: FileArgs = parse_args(arguments)?;
                let hash = engine
                    .cache_file(args.session_id.as_deref(), &args.file_path, &args.content)
                    .await?;
                Ok(json!({ "hash": hash }))
            }
            tools::FILE_CHANGED => {
                let args: FileArgs = parse_args(arguments)?;
                let change = engine
                    .check_file_changed(args.session_id.as_deref(), &args.file_path, &args.content)
                    .await?;
                Ok(serde_json::to_value(change)?)
            }
            other => Err(ContextError::validation(format!("unknown tool '{other}'"))),
        }
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| ContextError::validation(format!("invalid arguments: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_context_store::KeeperConfig;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn handler(temp_dir: &TempDir) -> ToolHandler {
        let config = KeeperConfig::new(temp_dir.path()).with_project_name("casino");
        ToolHandler::new(Arc::new(ContextEngine::open(config).await.unwrap()))
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(&temp_dir).await;
        assert_eq!(handler.call("context_explode", None).await, None);
    }

    #[tokio::test]
    async fn test_save_and_get_with_filters() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(&temp_dir).await;

        let saved = handler
            .call(
                tools::SAVE,
                Some(json!({
                    "key": "task1",
                    "value": "implement X",
                    "category": "task",
                    "priority": "high",
                    "metadata": {"ticket": 7}
                })),
            )
            .await
            .unwrap();
        assert_eq!(saved["success"], true);
        assert_eq!(saved["item"]["priority"], "high");

        handler
            .call(tools::SAVE, Some(json!({"key": "note1", "value": "n"})))
            .await
            .unwrap();

        let found = handler
            .call(
                tools::GET,
                Some(json!({"categories": ["task"], "sort": "priority", "limit": 5})),
            )
            .await
            .unwrap();
        assert_eq!(found["success"], true);
        assert_eq!(found["count"], 1);
        assert_eq!(found["items"][0]["key"], "task1");
        assert_eq!(found["items"][0]["metadata"]["ticket"], 7);
    }

    #[tokio::test]
    async fn test_validation_failures_are_structured() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(&temp_dir).await;

        let bad_priority = handler
            .call(
                tools::SAVE,
                Some(json!({"key": "k", "value": "v", "priority": "urgent"})),
            )
            .await
            .unwrap();
        assert_eq!(bad_priority["success"], false);
        assert_eq!(bad_priority["kind"], "validation");

        let bad_limit = handler
            .call(tools::GET, Some(json!({"limit": 0})))
            .await
            .unwrap();
        assert_eq!(bad_limit["kind"], "validation");

        let missing = handler
            .call(
                tools::DELETE,
                Some(json!({"key": "k", "sessionId": "does-not-exist"})),
            )
            .await
            .unwrap();
        assert_eq!(missing["success"], false);
        assert_eq!(missing["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_file_cache_tools() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(&temp_dir).await;

        let cached = handler
            .call(
                tools::CACHE_FILE,
                Some(json!({"filePath": "a.php", "content": "<?php"})),
            )
            .await
            .unwrap();
        let hash = cached["hash"].clone();

        let unchanged = handler
            .call(
                tools::FILE_CHANGED,
                Some(json!({"filePath": "a.php", "content": "<?php"})),
            )
            .await
            .unwrap();
        assert_eq!(unchanged["changed"], false);
        assert_eq!(unchanged["previousHash"], hash);

        let changed = handler
            .call(
                tools::FILE_CHANGED,
                Some(json!({"filePath": "a.php", "content": "<?php echo 1;"})),
            )
            .await
            .unwrap();
        assert_eq!(changed["changed"], true);
    }

    #[tokio::test]
    async fn test_session_and_checkpoint_tools() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(&temp_dir).await;

        let started = handler
            .call(
                tools::SESSION_START,
                Some(json!({"name": "Feature Work", "defaultChannel": "backend"})),
            )
            .await
            .unwrap();
        let session_id = started["session"]["id"].as_str().unwrap().to_string();

        handler
            .call(tools::SAVE, Some(json!({"key": "k", "value": "v"})))
            .await
            .unwrap();

        let listed = handler.call(tools::SESSION_LIST, None).await.unwrap();
        assert_eq!(listed["sessions"][0]["id"], session_id.as_str());
        assert_eq!(listed["sessions"][0]["itemCount"], 1);

        let checkpoint = handler
            .call(tools::CHECKPOINT, Some(json!({"name": "pre-merge"})))
            .await
            .unwrap();
        assert_eq!(checkpoint["success"], true);
        assert_eq!(checkpoint["itemCount"], 1);

        let status = handler.call(tools::STATUS, None).await.unwrap();
        assert_eq!(status["status"]["currentSession"]["id"], session_id.as_str());
        assert_eq!(status["status"]["totalItems"], 1);
    }
}
