//! Error types for the Hetzner Cloud backend.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the Hetzner Cloud backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HetznerError {
    /// Raised when the backend cannot be constructed from configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the HTTP request never produced a response.
    #[error("request to {url} failed: {message}")]
    Transport {
        /// Request URL.
        url: String,
        /// Transport error text.
        message: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("API returned {status} ({code}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Machine readable error code from the response body.
        code: String,
        /// Human readable message from the response body.
        message: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("failed to decode response from {url}: {message}")]
    Decode {
        /// Request URL.
        url: String,
        /// Decoder error text.
        message: String,
    },
    /// Raised when an action finishes with status `error`.
    #[error("action {action_id} ({command}) failed: {code}: {message}")]
    ActionFailed {
        /// Action identifier.
        action_id: u64,
        /// Action command.
        command: String,
        /// Error code reported on the action.
        code: String,
        /// Error message reported on the action.
        message: String,
    },
    /// Raised when an action is still running once the deadline passes.
    #[error("timeout waiting for action {action_id} ({command})")]
    Timeout {
        /// Action identifier.
        action_id: u64,
        /// Action command.
        command: String,
    },
}

impl From<ConfigError> for HetznerError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
