//! Error types for flexcms-stream

use thiserror::Error;

/// Result type alias using flexcms-stream Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while opening or reading a generation stream
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The endpoint answered with a non-success status before streaming began
    #[error("{message}")]
    Status { status: u16, message: String },

    /// Reading the response body failed mid-stream
    #[error("Stream read failed: {0}")]
    Read(String),

    /// The generation request cannot be turned into an HTTP request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Build a status error, deriving a readable message from the code and,
    /// when the body is a JSON error document, its detail string.
    pub fn status(status: u16, body: &str) -> Self {
        let summary = match status {
            400 => "The generation request was rejected".to_string(),
            401 => "Authentication required".to_string(),
            403 => "You are not allowed to use this agent".to_string(),
            404 => "Generation endpoint or content instance not found".to_string(),
            422 => "The generation request is invalid".to_string(),
            429 => "Too many generation requests, try again shortly".to_string(),
            500..=599 => "The server failed to start the generation".to_string(),
            _ => "Generation request failed".to_string(),
        };

        let message = match error_detail(body) {
            Some(detail) => format!("{summary} (HTTP {status}): {detail}"),
            None => format!("{summary} (HTTP {status})"),
        };

        Self::Status { status, message }
    }

    /// Check if this error is worth retrying with the same request
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Read(_) => true,
            Error::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }
}

/// Pull a human-readable message out of a JSON error body.
fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["detail", "message", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        .map(str::to_string)
}
