//! Protocol-level failures and their JSON-RPC error codes
//!
//! Tool failures are not errors at this level: handlers report them in-band
//! with `isError: true`.

use crate::mcp::protocol::*;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum McpError {
    #[error("Protocol version not supported: {version}. Supported versions: {supported:?}")]
    UnsupportedProtocolVersion {
        version: String,
        supported: Vec<String>,
    },

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("Invalid parameters: {message}")]
    InvalidParameters { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Internal server error: {message}")]
    InternalError { message: String },
}

impl McpError {
    #[inline]
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Self::UnsupportedProtocolVersion { version, supported } => JsonRpcError::new(
                mcp_error_codes::INVALID_PROTOCOL_VERSION,
                format!(
                    "Unsupported protocol version: {}. Supported: {}",
                    version,
                    supported.join(", ")
                ),
                None,
            ),
            Self::ToolNotFound { name } => JsonRpcError::new(
                mcp_error_codes::TOOL_NOT_FOUND,
                format!("Tool not found: {}", name),
                None,
            ),
            Self::InvalidParameters { message } => {
                JsonRpcError::new(error_codes::INVALID_PARAMS, message.clone(), None)
            }
            Self::InvalidRequest { message } => {
                JsonRpcError::new(error_codes::INVALID_REQUEST, message.clone(), None)
            }
            Self::MethodNotFound { method } => JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
                None,
            ),
            Self::InternalError { message } => {
                JsonRpcError::new(error_codes::INTERNAL_ERROR, message.clone(), None)
            }
        }
    }

    #[inline]
    pub fn to_error_response(&self, id: Option<RequestId>) -> JsonRpcMessage {
        JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(self.to_jsonrpc_error(), id))
    }

    /// Client mistakes log at `warn`, server faults at `error`
    #[inline]
    pub fn log(&self) {
        match self {
            Self::InternalError { .. } => error!("Server error: {}", self),
            _ => warn!("Client error: {}", self),
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;

impl From<serde_json::Error> for McpError {
    #[inline]
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidParameters {
            message: error.to_string(),
        }
    }
}

impl From<McpError> for crate::KbError {
    #[inline]
    fn from(error: McpError) -> Self {
        Self::Mcp(error.to_string())
    }
}
