//! Error types for marketmind.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all marketmind operations.
#[derive(Error, Debug)]
pub enum MarketMindError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Query canceled")]
    Canceled,

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Gateway error at iteration {iteration} after {} tool call(s): {message}", .tools_attempted.len())]
    Gateway {
        iteration: usize,
        tools_attempted: Vec<String>,
        message: String,
    },

    #[error("Iteration limit of {limit} reached without a final answer ({} tool call(s) attempted)", .tools_attempted.len())]
    IterationExhausted {
        limit: usize,
        tools_attempted: Vec<String>,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Summary parsing failed: {0}")]
    SummarizationFallback(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl MarketMindError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a tool execution error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Wrap a gateway failure with the loop position it happened at.
    pub fn gateway(iteration: usize, tools_attempted: &[String], source: &MarketMindError) -> Self {
        Self::Gateway {
            iteration,
            tools_attempted: tools_attempted.to_vec(),
            message: source.to_string(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) | Self::SummarizationFallback(_) => {
                ErrorCategory::Serialization
            }
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Gateway { .. } | Self::IterationExhausted { .. } => ErrorCategory::Orchestration,
            Self::Persistence(_) | Self::Io(_) => ErrorCategory::Persistence,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            Self::IterationExhausted { .. } => return RecoverySuggestion::RaiseIterationLimit,
            Self::Gateway { .. } => return RecoverySuggestion::RetryWithBackoff,
            _ => {}
        }
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Server => {
                RecoverySuggestion::RetryWithBackoff
            }
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::ToolExecution => RecoverySuggestion::CheckToolImplementation,
            ErrorCategory::Persistence => RecoverySuggestion::CheckStorage,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, MarketMindError>;
