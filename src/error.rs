//! Error types for the sync client.

use thiserror::Error;

/// Main error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Could not initiate subscription: {0}")]
    SubscriptionInitiation(String),

    #[error("Background worker has shut down")]
    WorkerGone,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a snapshot fetch. Surfaced once per fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("HTTP {status}")]
    Status { status: u16 },

    /// Malformed payload.
    #[error("Decoding failed: {0}")]
    Decoding(String),

    #[error("Fetch cancelled")]
    Cancelled,
}

/// Failure of the push transport. Drives reconnection; never terminal for
/// subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport closed")]
    Closed,
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Decoding(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::InvalidConfig(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
