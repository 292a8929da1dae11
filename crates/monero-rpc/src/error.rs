//! RPC error types.

use serde_json::Value;
use thiserror::Error;

/// JSON-RPC 2.0 standard error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Debug, Error)]
pub enum RpcError {
    /// The node could not be reached. Timeouts, refusals and DNS failures all
    /// land here.
    #[error("connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("{method} returned HTTP {status}: {body}")]
    HttpStatus {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("RPC error {code} from {method}: {message}")]
    Rpc {
        code: i64,
        message: String,
        method: String,
        params: Option<Value>,
    },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no result in response to {context}")]
    NoResult { context: String },

    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    #[error("portable storage error: {0}")]
    PortableStorage(String),
}

impl RpcError {
    /// Whether the error means the node was unreachable, as opposed to the
    /// node answering with a failure.
    pub fn is_connection(&self) -> bool {
        matches!(self, RpcError::Connection { .. })
    }

    /// Numeric code of a domain-level RPC error.
    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn connection(url: &str, source: reqwest::Error) -> Self {
        let message = if source.is_timeout() {
            format!("request timed out ({source})")
        } else {
            source.to_string()
        };
        RpcError::Connection {
            url: url.to_string(),
            message,
        }
    }
}
