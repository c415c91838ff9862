//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading settings or a roster document.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read a file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The roster document parsed but cannot drive a conversation.
    #[error("invalid roster: {0}")]
    Roster(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
