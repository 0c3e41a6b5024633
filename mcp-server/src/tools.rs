//! Tool definitions for `tools/list`.

use serde::{Deserialize, Serialize};
use serde_json::json;

pub const SESSION_START: &str = "context_session_start";
pub const SESSION_LIST: &str = "context_session_list";
pub const SAVE: &str = "context_save";
pub const GET: &str = "context_get";
pub const DELETE: &str = "context_delete";
pub const STATUS: &str = "context_status";
pub const CHECKPOINT: &str = "context_checkpoint";
pub const CACHE_FILE: &str = "context_cache_file";
pub const FILE_CHANGED: &str = "context_file_changed";

/// Every tool name the server answers to.
pub const TOOL_NAMES: [&str; 9] = [
    SESSION_START,
    SESSION_LIST,
    SAVE,
    GET,
    DELETE,
    STATUS,
    CHECKPOINT,
    CACHE_FILE,
    FILE_CHANGED,
];

/// MCP tool definition: name, description and JSON Schema for the arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

fn session_id_property() -> serde_json::Value {
    json!({
        "type": "string",
        "description": "Session to act on. Defaults to the current session."
    })
}

/// All tool definitions, in a stable order.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            SESSION_START,
            "Start a new session and make it the current one.",
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Session name" },
                    "description": { "type": "string" },
                    "projectDir": {
                        "type": "string",
                        "description": "Project directory; its git branch is recorded"
                    },
                    "defaultChannel": {
                        "type": "string",
                        "description": "Channel applied to items saved without one"
                    },
                    "branch": { "type": "string" }
                },
                "required": ["name"]
            }),
        ),
        ToolDefinition::new(
            SESSION_LIST,
            "List sessions, most recently updated first.",
            json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "minimum": 1, "default": 10 }
                }
            }),
        ),
        ToolDefinition::new(
            SAVE,
            "Save a context item. Saving an existing key overwrites it.",
            json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string" },
                    "value": { "type": "string" },
                    "category": {
                        "type": "string",
                        "enum": ["task", "decision", "progress", "note", "warning", "error", "critical"]
                    },
                    "priority": {
                        "type": "string",
                        "enum": ["critical", "high", "normal", "low"],
                        "default": "normal"
                    },
                    "metadata": { "type": "object" },
                    "private": { "type": "boolean", "default": false },
                    "channel": { "type": "string" },
                    "sessionId": session_id_property()
                },
                "required": ["key", "value"]
            }),
        ),
        ToolDefinition::new(
            GET,
            "Retrieve context items with filters, ordering and pagination.",
            json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string" },
                    "keys": { "type": "array", "items": { "type": "string" } },
                    "category": { "type": "string" },
                    "categories": { "type": "array", "items": { "type": "string" } },
                    "priority": { "type": "string" },
                    "priorities": { "type": "array", "items": { "type": "string" } },
                    "channel": { "type": "string" },
                    "private": { "type": "boolean" },
                    "createdAfter": { "type": "string", "format": "date-time" },
                    "createdBefore": { "type": "string", "format": "date-time" },
                    "keyPattern": {
                        "type": "string",
                        "description": "Case-insensitive regular expression matched against keys"
                    },
                    "sort": {
                        "type": "string",
                        "enum": ["created_asc", "created_desc", "updated_asc", "updated_desc", "priority"],
                        "default": "created_desc"
                    },
                    "offset": { "type": "integer", "minimum": 0, "default": 0 },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 1000, "default": 50 },
                    "sessionId": session_id_property()
                }
            }),
        ),
        ToolDefinition::new(
            DELETE,
            "Delete a context item by key.",
            json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string" },
                    "sessionId": session_id_property()
                },
                "required": ["key"]
            }),
        ),
        ToolDefinition::new(
            STATUS,
            "Show the current session, aggregate counts and storage location.",
            json!({ "type": "object", "properties": {} }),
        ),
        ToolDefinition::new(
            CHECKPOINT,
            "Write a named snapshot of a session and all of its items.",
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "sessionId": session_id_property()
                },
                "required": ["name"]
            }),
        ),
        ToolDefinition::new(
            CACHE_FILE,
            "Cache a file's content digest for later change detection.",
            json!({
                "type": "object",
                "properties": {
                    "filePath": { "type": "string" },
                    "content": { "type": "string" },
                    "sessionId": session_id_property()
                },
                "required": ["filePath", "content"]
            }),
        ),
        ToolDefinition::new(
            FILE_CHANGED,
            "Check whether a file's content changed since it was cached.",
            json!({
                "type": "object",
                "properties": {
                    "filePath": { "type": "string" },
                    "content": { "type": "string" },
                    "sessionId": session_id_property()
                },
                "required": ["filePath", "content"]
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_definitions_cover_every_tool() {
        let names: Vec<String> = tool_definitions().into_iter().map(|t| t.name).collect();
        assert_eq!(names, TOOL_NAMES.map(str::to_string).to_vec());
    }

    #[test]
    fn test_schemas_are_objects() {
        for tool in tool_definitions() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        }
    }
}
