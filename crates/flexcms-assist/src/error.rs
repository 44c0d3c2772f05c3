//! Error types for flexcms-assist

use thiserror::Error;

/// Result type alias using flexcms-assist Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by field-assist operations
#[derive(Error, Debug)]
pub enum Error {
    /// Accept was requested while text is still arriving
    #[error("Generation is still in progress")]
    StillStreaming,

    /// Accept was requested but no generation has run
    #[error("There is no generated text to accept")]
    NothingToAccept,

    /// Restart was requested before any generation was started
    #[error("No previous generation request to start over")]
    NothingToRestart,
}
