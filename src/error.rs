//! Unified error types for the sync and key lifecycle core
//!
//! All errors carry the original message so callers can render a
//! diagnosable failure. The orchestrator decides retry vs. surface via
//! [`CoreError::is_transient`]; nothing below it swallows errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type shared by the security and sync layers.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum CoreError {
    /// Network failure or timeout. Retryable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Structured rejection from the External Key Manager. Not retryable;
    /// the message is surfaced to the user verbatim.
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// Credential rejected. Terminal; requires re-authentication.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Contract violation by the caller (bad byte lengths, malformed input).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Persisted store collaborator failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A logic bug surfaced at runtime. Logged at the site of detection.
    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),
}

impl CoreError {
    /// Whether the orchestrator should retry after this error.
    ///
    /// Timeouts are transport failures, never terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Transport(_))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_status() {
            let code = e
                .status()
                .map(|s| i64::from(s.as_u16()))
                .unwrap_or_default();
            CoreError::Api {
                code,
                message: e.to_string(),
            }
        } else {
            // Connect errors, timeouts, body read failures
            CoreError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::InvalidInput(e.to_string())
    }
}

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;
