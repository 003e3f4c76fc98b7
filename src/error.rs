//! Error types for the proxy
//!
//! Errors are grouped by subsystem with `thiserror` so call sites can match
//! on the category without string inspection. Nothing in this hierarchy is
//! surfaced to a miner directly; miners only ever see Stratum error replies.

use std::time::Duration;
use thiserror::Error;

/// Configuration error subtypes
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value} (expected: {expected})")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Parse error in {file}: {message}")]
    ParseError { file: String, message: String },
}

/// Stratum protocol error subtypes (both miner-facing and pool-facing)
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum StratumError {
    #[error("Invalid message format: {message}")]
    InvalidFormat { message: String },

    #[error("Invalid parameters for {method}: {message}")]
    InvalidParams { method: String, message: String },

    #[error("Upstream rejected {request}: {reason}")]
    UpstreamRejected { request: String, reason: String },

    #[error("Server binding failed: {address} - {reason}")]
    ServerBindingFailed { address: String, reason: String },

    #[error("Connection closed by peer: {peer}")]
    ConnectionClosed { peer: String },
}

/// Node RPC error subtypes (solo mode)
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum NodeError {
    #[error("RPC {method} failed: {message}")]
    RpcFailed { method: String, message: String },

    #[error("RPC {method} returned error {code}: {message}")]
    RpcError {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Malformed template: {message}")]
    BadTemplate { message: String },

    #[error("Block rejected: {message}")]
    BlockRejected { message: String },
}

/// Data validation error subtypes
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ValidationError {
    #[error("Invalid hash: expected {expected} bytes, got {actual}")]
    InvalidHashLength { expected: usize, actual: usize },

    #[error("Invalid target: {value} - {reason}")]
    InvalidTarget { value: String, reason: String },

    #[error("Invalid nonce: {value} - {reason}")]
    InvalidNonce { value: String, reason: String },

    #[error("Invalid hex field {field}: {message}")]
    InvalidHex { field: String, message: String },
}

/// Main error type for the proxy
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Configuration errors, fatal at startup
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Stratum protocol errors
    #[error("Stratum error: {0}")]
    Stratum(#[from] StratumError),

    /// Node RPC errors
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Timeout errors with context
    #[error("Operation timed out after {timeout:?}: {operation}")]
    Timeout { operation: String, timeout: Duration },
}

/// Result type alias for the proxy
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a generic configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::InvalidValue {
            field: "config".to_string(),
            value: msg.into(),
            expected: "valid configuration".to_string(),
        })
    }

    /// Create an invalid-value configuration error
    pub fn config_invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::Config(ConfigError::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        })
    }

    /// Create a generic Stratum format error
    pub fn stratum(msg: impl Into<String>) -> Self {
        Self::Stratum(StratumError::InvalidFormat {
            message: msg.into(),
        })
    }

    /// Create a bad-parameters Stratum error
    pub fn stratum_params(method: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Stratum(StratumError::InvalidParams {
            method: method.into(),
            message: msg.into(),
        })
    }

    /// Create a node RPC failure error
    pub fn node_rpc(method: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Node(NodeError::RpcFailed {
            method: method.into(),
            message: msg.into(),
        })
    }

    /// Create a malformed-template error
    pub fn bad_template(msg: impl Into<String>) -> Self {
        Self::Node(NodeError::BadTemplate {
            message: msg.into(),
        })
    }

    /// Create an invalid-hex validation error
    pub fn invalid_hex(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation(ValidationError::InvalidHex {
            field: field.into(),
            message: msg.into(),
        })
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "configuration",
            Error::Stratum(_) => "stratum",
            Error::Node(_) => "node",
            Error::Validation(_) => "validation",
            Error::Json(_) => "serialization",
            Error::Io(_) => "io",
            Error::Http(_) => "http",
            Error::Timeout { .. } => "timeout",
        }
    }

    /// Whether the error is transient and the operation may be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Node(NodeError::RpcFailed { .. })
                | Error::Http(_)
                | Error::Io(_)
                | Error::Timeout { .. }
        )
    }
}
