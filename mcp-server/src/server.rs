//! MCP server: newline-delimited JSON-RPC over stdio.

use std::sync::Arc;

use anyhow::Result;
use keeper_context_store::ContextEngine;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::handler::ToolHandler;
use crate::protocol::{
    JsonRpcId, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, error_codes, methods,
};
use crate::tools;

/// Name reported in the `initialize` handshake.
pub const SERVER_NAME: &str = "memory-keeper";

/// JSON-RPC front end over a [`ToolHandler`].
pub struct McpServer {
    handler: ToolHandler,
}

impl McpServer {
    pub fn new(engine: Arc<ContextEngine>) -> Self {
        Self {
            handler: ToolHandler::new(engine),
        }
    }

    /// Serve requests from stdin, writing responses to stdout.
    pub async fn run(&self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Serve requests from `reader` until EOF, one JSON message per line.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("Server ready, waiting for requests...");

        let mut lines = reader.lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("Error reading stdin: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            debug!("Received: {line}");
            let Some(response) = self.handle_request(&line).await else {
                continue;
            };

            let response_json = serde_json::to_string(&response)?;
            debug!("Sending: {response_json}");
            writer.write_all(response_json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        info!("Server shutting down...");
        Ok(())
    }

    /// Handle one JSON-RPC message. Notifications yield no response.
    pub async fn handle_request(&self, input: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(input) {
            Ok(request) => request,
            Err(e) => {
                warn!("Failed to parse request: {e}");
                return Some(JsonRpcResponse::error(
                    None,
                    error_codes::PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
            }
        };

        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id,
                error_codes::INVALID_REQUEST,
                "Invalid JSON-RPC version",
            ));
        }

        let Some(id) = request.id else {
            if request.method == methods::INITIALIZED {
                info!("Client initialized");
            } else {
                debug!("Notification {} ignored", request.method);
            }
            return None;
        };
        let id = Some(id);

        let response = match request.method.as_str() {
            methods::INITIALIZE => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            ),
            methods::PING => JsonRpcResponse::success(id, json!({})),
            methods::TOOLS_LIST => {
                JsonRpcResponse::success(id, json!({ "tools": tools::tool_definitions() }))
            }
            methods::TOOLS_CALL => self.handle_tools_call(id, request.params).await,
            other => JsonRpcResponse::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        };
        Some(response)
    }

    async fn handle_tools_call(
        &self,
        id: Option<JsonRpcId>,
        params: Option<Value>,
    ) -> JsonRpcResponse {
        let mut params = params.unwrap_or(Value::Null);
        let Some(name) = params.get("name").and_then(Value::as_str).map(str::to_string) else {
            return JsonRpcResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                "tools/call requires a tool name",
            );
        };
        let arguments = params.get_mut("arguments").map(Value::take);

        let Some(result) = self.handler.call(&name, arguments).await else {
            return JsonRpcResponse::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {name}"),
            );
        };

        let is_error = result.get("success") != Some(&Value::Bool(true));
        let text = match serde_json::to_string_pretty(&result) {
            Ok(text) => text,
            Err(e) => {
                return JsonRpcResponse::error(
                    id,
                    error_codes::INTERNAL_ERROR,
                    format!("Failed to encode result: {e}"),
                );
            }
        };

        JsonRpcResponse::success(
            id,
            json!({
                "content": [{ "type": "text", "text": text }],
                "isError": is_error,
            }),
        )
    }
}
