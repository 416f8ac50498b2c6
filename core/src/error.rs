//! Structured error types for the delegated agent
//!
//! Provides type-safe error handling with enough context to decide whether
//! a failure is worth retrying and what to tell the user about it.

use std::time::Duration;
use thiserror::Error;

/// Primary error type for delegated agent operations
#[derive(Error, Debug)]
pub enum AgentError {
    // =========================================================================
    // Provider / API Errors
    // =========================================================================
    /// Authentication/authorization errors
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Provider throttled the request
    #[error("throttled by {service}: {message}")]
    Throttled { service: String, message: String },

    /// Model is not ready or temporarily unavailable
    #[error("model {model} is unavailable: {message}")]
    ModelUnavailable { model: String, message: String },

    /// Provider returned an error
    #[error("provider error: {status} - {message}")]
    ProviderError { status: u16, message: String },

    /// Agent loop ran out of model calls before finishing
    #[error("agent did not finish within {max_iterations} model calls")]
    IterationLimit { max_iterations: usize },

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// Connection not found in the registry
    #[error("session not found: {pc_id}")]
    SessionNotFound { pc_id: String },

    /// Connection already closed
    #[error("session closed: {pc_id}")]
    SessionClosed { pc_id: String },

    // =========================================================================
    // Tool Execution Errors
    // =========================================================================
    /// Tool not found
    #[error("tool not found: {tool_name}")]
    ToolNotFound { tool_name: String },

    /// Tool disabled in the registry
    #[error("tool '{tool_name}' is disabled: {reason}")]
    ToolDisabled { tool_name: String, reason: String },

    /// Tool execution failed
    #[error("tool execution failed: {tool_name} - {error}")]
    ToolExecutionFailed { tool_name: String, error: String },

    /// Invalid tool arguments
    #[error("invalid tool arguments for {tool_name}: {reason}")]
    InvalidToolArguments { tool_name: String, reason: String },

    // =========================================================================
    // MCP Errors
    // =========================================================================
    /// Child process or pipe failure
    #[error("mcp transport error ({server}): {message}")]
    McpTransport { server: String, message: String },

    /// Malformed message or JSON-RPC error reply
    #[error("mcp protocol error ({server}): {message}")]
    McpProtocol { server: String, message: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Missing required config
    #[error("missing required configuration: {key}")]
    MissingConfig { key: String },

    // =========================================================================
    // User Input Errors
    // =========================================================================
    /// Invalid user input
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    // =========================================================================
    // Network / System Errors
    // =========================================================================
    /// Network/connection error
    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Timeout
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Service unavailable (maintenance, 503)
    #[error("service temporarily unavailable")]
    ServiceUnavailable,

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal system error
    #[error("internal error: {message}")]
    Internal { message: String },

    // =========================================================================
    // External Error Wrappers
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl AgentError {
    /// Check if error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Throttled { .. } => true,
            Self::ModelUnavailable { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::Timeout { .. } => true,
            Self::ServiceUnavailable => true,

            Self::ProviderError { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),

            Self::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),

            Self::Unauthorized { .. }
            | Self::IterationLimit { .. }
            | Self::SessionNotFound { .. }
            | Self::SessionClosed { .. }
            | Self::ToolNotFound { .. }
            | Self::ToolDisabled { .. }
            | Self::ToolExecutionFailed { .. }
            | Self::InvalidToolArguments { .. }
            | Self::McpTransport { .. }
            | Self::McpProtocol { .. }
            | Self::InvalidConfig { .. }
            | Self::MissingConfig { .. }
            | Self::InvalidInput { .. }
            | Self::Internal { .. }
            | Self::Json(_)
            | Self::Http(_) => false,
        }
    }

    /// Get suggested retry delay for retryable errors
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Throttled { .. } => Some(Duration::from_secs(2)),
            Self::ModelUnavailable { .. } => Some(Duration::from_secs(5)),
            Self::Timeout { .. } => Some(Duration::from_secs(1)),
            Self::ConnectionFailed { .. } => Some(Duration::from_secs(1)),
            Self::ServiceUnavailable => Some(Duration::from_secs(10)),
            _ => None,
        }
    }

    /// Check if error requires user action
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. } | Self::InvalidConfig { .. } | Self::MissingConfig { .. }
        )
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized { .. } => {
                "Authentication failed. Please check your AWS credentials.".to_string()
            }
            Self::MissingConfig { key } => {
                format!("Missing configuration value '{}'.", key)
            }
            Self::Throttled { .. } | Self::ModelUnavailable { .. } | Self::ServiceUnavailable => {
                "The model is busy right now. Please try again in a moment.".to_string()
            }
            Self::IterationLimit { .. } => {
                "The request took too many steps to answer.".to_string()
            }
            Self::ToolExecutionFailed { tool_name, .. } => {
                format!("Failed to execute tool '{}'.", tool_name)
            }
            _ => self.to_string(),
        }
    }
}

/// Convert from anyhow::Error to AgentError
impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return Self::Io(std::io::Error::new(io_err.kind(), io_err.to_string()));
        }

        Self::Internal {
            message: err.to_string(),
        }
    }
}

/// Convert from serde_json::Error to AgentError
impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Convert reqwest errors, keeping connect/timeout failures retryable
impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return Self::ConnectionFailed {
                message: err.to_string(),
            };
        }
        if let Some(status) = err.status() {
            return Self::ProviderError {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        Self::Http(err.to_string())
    }
}

/// Result type alias using AgentError
pub type Result<T> = std::result::Result<T, AgentError>;

/// Extension trait for converting Option to Result with AgentError
pub trait OptionExt<T> {
    fn ok_or_missing(self, key: impl Into<String>) -> Result<T>;
    fn ok_or_session(self, pc_id: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_missing(self, key: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| AgentError::MissingConfig { key: key.into() })
    }

    fn ok_or_session(self, pc_id: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| AgentError::SessionNotFound {
            pc_id: pc_id.into(),
        })
    }
}
