//! Error types for linkhub.

use thiserror::Error;

use crate::SessionId;

/// Main error type for linkhub operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Session identifier rejected
    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// Session limit reached
    #[error("Session limit reached (max: {0})")]
    SessionLimitReached(usize),

    /// Session exists but its connection is not open
    #[error("Session not connected: {0}")]
    SessionNotConnected(SessionId),

    /// Recipient is not registered on the network
    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    /// Recipient could not be normalized into an address
    #[error("Invalid recipient: {0:?}")]
    InvalidRecipient(String),

    /// Error reported by the protocol engine
    #[error("Engine error: {0}")]
    Engine(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input or parameters (generic)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
