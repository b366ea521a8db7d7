//! MCP server: line-delimited JSON-RPC over stdio, routed to tool handlers

use crate::mcp::errors::{McpError, McpResult};
use crate::mcp::protocol::*;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

pub struct McpServer {
    pub server_info: Implementation,
    pub capabilities: ServerCapabilities,
    pub instructions: Option<String>,
    pub tools: Arc<RwLock<HashMap<String, Tool>>>,
    pub tool_handlers: Arc<RwLock<HashMap<String, Box<dyn ToolHandler>>>>,
    pub connection_state: Arc<RwLock<ConnectionState>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Executes one tool; failures the caller should see go in the result body
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult>;
}

pub struct MessageHandler {
    server: Arc<McpServer>,
}

impl McpServer {
    #[inline]
    pub fn new(name: String, version: String) -> Self {
        Self {
            server_info: Implementation { name, version },
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            instructions: None,
            tools: Arc::new(RwLock::new(HashMap::new())),
            tool_handlers: Arc::new(RwLock::new(HashMap::new())),
            connection_state: Arc::new(RwLock::new(ConnectionState::Uninitialized)),
        }
    }

    #[inline]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    #[inline]
    pub async fn register_tool<H>(&self, tool: Tool, handler: H)
    where
        H: ToolHandler + 'static,
    {
        let tool_name = tool.name.clone();

        {
            let mut tools = self.tools.write().await;
            tools.insert(tool_name.clone(), tool);
        }

        {
            let mut handlers = self.tool_handlers.write().await;
            handlers.insert(tool_name.clone(), Box::new(handler));
        }

        debug!("Registered tool: {}", tool_name);
    }

    /// Registered tool names, sorted
    #[inline]
    pub async fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    #[inline]
    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        info!("Starting MCP server with stdio transport");
        self.serve(io::stdin(), io::stdout()).await
    }

    /// Answer one JSON-RPC message per line until the reader hits EOF
    #[inline]
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    info!("EOF reached, closing connection");
                    break;
                }
                Ok(_) => {
                    if let Some(reply) = self.handle_line(&line).await {
                        Self::send_message(&mut writer, &reply).await?;
                    }
                }
                Err(e) => {
                    error!("Error reading from stdin: {}", e);
                    break;
                }
            }
        }

        {
            let mut state = self.connection_state.write().await;
            *state = ConnectionState::Closed;
        }

        info!("MCP server stopped");
        Ok(())
    }

    /// Process one raw line; notifications and blank lines produce no reply
    #[inline]
    pub async fn handle_line(self: &Arc<Self>, line: &str) -> Option<JsonRpcMessage> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let raw_value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to parse JSON: {}", e);
                return Some(JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(
                    JsonRpcError::parse_error(),
                    None,
                )));
            }
        };

        match parse_message(raw_value) {
            Ok(message) => {
                MessageHandler::new(Arc::clone(self))
                    .process_message(message)
                    .await
            }
            Err(error) => {
                warn!("Message validation failed: {}", error.message);
                Some(JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(
                    error, None,
                )))
            }
        }
    }

    async fn send_message<W>(writer: &mut W, message: &JsonRpcMessage) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let json = serde_json::to_string(message)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    #[inline]
    pub async fn connection_state(&self) -> ConnectionState {
        *self.connection_state.read().await
    }
}

impl MessageHandler {
    #[inline]
    pub fn new(server: Arc<McpServer>) -> Self {
        Self { server }
    }

    /// Route a decoded message, returning the reply to send, if any
    #[inline]
    pub async fn process_message(&self, message: JsonRpcMessage) -> Option<JsonRpcMessage> {
        match message {
            JsonRpcMessage::Request(request) => Some(self.handle_request(request).await),
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(&notification).await;
                None
            }
            JsonRpcMessage::Response(_) | JsonRpcMessage::ErrorResponse(_) => {
                warn!("Received unexpected response message from client");
                None
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        let outcome = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "tools/list" => self.handle_list_tools().await,
            "tools/call" => self.handle_call_tool(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            other => Err(McpError::MethodNotFound {
                method: other.to_string(),
            }),
        };

        match outcome {
            Ok(result) => JsonRpcMessage::Response(JsonRpcResponse::new(result, request.id)),
            Err(e) => {
                e.log();
                e.to_error_response(Some(request.id))
            }
        }
    }

    async fn handle_notification(&self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            "initialized" | "notifications/initialized" => {
                let mut state = self.server.connection_state.write().await;
                *state = ConnectionState::Ready;
                info!("Server ready to handle requests");
            }
            "notifications/cancelled" => {
                debug!("Received cancellation notification");
            }
            _ => {
                warn!("Unknown notification method: {}", notification.method);
            }
        }
    }

    #[inline]
    pub async fn handle_initialize(&self, params: Option<Value>) -> McpResult<Value> {
        let params: InitializeParams = match params {
            Some(p) => serde_json::from_value(p)?,
            None => {
                return Err(McpError::InvalidParameters {
                    message: "Initialize request missing parameters".to_string(),
                });
            }
        };

        if !is_protocol_version_supported(&params.protocol_version) {
            return Err(McpError::UnsupportedProtocolVersion {
                version: params.protocol_version,
                supported: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|v| (*v).to_string())
                    .collect(),
            });
        }

        {
            let mut state = self.server.connection_state.write().await;
            *state = ConnectionState::Initializing;
        }

        // answer with the client's version when we speak it
        let result = InitializeResult {
            protocol_version: params.protocol_version,
            capabilities: self.server.capabilities.clone(),
            server_info: self.server.server_info.clone(),
            instructions: self.server.instructions.clone(),
        };

        info!("Client initialized: {}", params.client_info.name);
        serde_json::to_value(result).map_err(|e| McpError::InternalError {
            message: e.to_string(),
        })
    }

    #[inline]
    pub async fn handle_list_tools(&self) -> McpResult<Value> {
        let tools = self.server.tools.read().await;
        let mut tools_vec: Vec<Tool> = tools.values().cloned().collect();
        tools_vec.sort_by(|a, b| a.name.cmp(&b.name));

        serde_json::to_value(ListToolsResult { tools: tools_vec }).map_err(|e| {
            McpError::InternalError {
                message: e.to_string(),
            }
        })
    }

    #[inline]
    pub async fn handle_call_tool(&self, params: Option<Value>) -> McpResult<Value> {
        let params: CallToolParams = match params {
            Some(p) => serde_json::from_value(p)?,
            None => {
                return Err(McpError::InvalidParameters {
                    message: "Tool call request missing parameters".to_string(),
                });
            }
        };

        let handlers = self.server.tool_handlers.read().await;
        let handler = handlers
            .get(&params.name)
            .ok_or_else(|| McpError::ToolNotFound {
                name: params.name.clone(),
            })?;

        let tool_name = params.name.clone();
        let result = handler
            .handle(params)
            .await
            .map_err(|e| McpError::InternalError {
                message: format!("Tool '{}' execution failed: {:#}", tool_name, e),
            })?;

        serde_json::to_value(result).map_err(|e| McpError::InternalError {
            message: e.to_string(),
        })
    }
}
