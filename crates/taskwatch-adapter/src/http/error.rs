/*
[INPUT]:  Error sources (HTTP, API, serialization, WebSocket)
[OUTPUT]: Structured error types with not-found and retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the task service adapter
#[derive(Error, Debug)]
pub enum TaskwatchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error (code {code}): {message}")]
    Api { code: i32, message: String },

    /// The requested task does not exist on the server
    #[error("task {id} not found")]
    NotFound { id: String },

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimit { retry_after: u64 },
}

impl TaskwatchError {
    /// Check if the error is transient and the call may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskwatchError::Http(_)
            | TaskwatchError::RateLimit { .. }
            | TaskwatchError::WebSocket(_) => true,
            TaskwatchError::Api { code, .. } => *code >= 500,
            _ => false,
        }
    }

    /// Get retry delay in seconds (if the server asked for one)
    pub fn retry_delay(&self) -> Option<u64> {
        match self {
            TaskwatchError::RateLimit { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Check if the server reported the resource as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, TaskwatchError::NotFound { .. })
    }

    /// Create an API error from status code and message
    pub fn api_error(status: StatusCode, message: impl Into<String>) -> Self {
        TaskwatchError::Api {
            code: status.as_u16() as i32,
            message: message.into(),
        }
    }
}

/// Result type alias for task service operations
pub type Result<T> = std::result::Result<T, TaskwatchError>;
