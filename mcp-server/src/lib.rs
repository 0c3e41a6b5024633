//! MCP tool server for the Memory Keeper context store.
//!
//! Speaks JSON-RPC 2.0 over stdio, one message per line, and exposes the
//! context engine as `context_*` tools.

pub mod handler;
pub mod protocol;
pub mod server;
pub mod tools;

pub use handler::ToolHandler;
pub use server::McpServer;
