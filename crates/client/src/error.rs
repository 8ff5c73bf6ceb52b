//! Error types for the knock client

use thiserror::Error;

/// Realtime channel failures
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to connect realtime channel: {0}")]
    Connect(String),

    #[error("Realtime channel closed")]
    Closed,

    #[error("Subscription cancelled")]
    Cancelled,

    #[error("Invalid realtime payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Remote service (HTTP) failures
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
}

/// Session store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Failed to encode stored value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Top-level failures surfaced to the UI.
///
/// Nothing here is fatal; every variant degrades to an unauthenticated or
/// profile-missing state.
#[derive(Debug, Error)]
pub enum KnockError {
    #[error("Transport failure: {0}")]
    Transport(#[from] ServiceError),

    #[error("Realtime failure: {0}")]
    Channel(#[from] ChannelError),

    #[error("Handshake failed: {reason}")]
    Handshake { reason: String },

    #[error("Sign-in attempt superseded by a newer one")]
    Superseded,

    #[error("Session store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Failed to open browser: {0}")]
    Browser(#[from] std::io::Error),
}
