//! MCP (Model Context Protocol) server
//!
//! JSON-RPC 2.0 over stdio, exposing the knowledge base search and post
//! creation as tools.

#[cfg(test)]
mod tests;

pub mod errors;
pub mod protocol;
pub mod server;
pub mod tools;

pub use errors::{McpError, McpResult};
pub use server::{McpServer, ToolHandler};
pub use tools::{AddPostHandler, SearchKnowledgeBaseHandler, register_knowledge_base_tools};
