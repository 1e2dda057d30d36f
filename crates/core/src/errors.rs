//! Error types

use alloy_primitives::B256;
use thiserror::Error;

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Price feed errors
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Listener already started")]
    AlreadyStarted,

    #[error("Feed disconnected")]
    Disconnected,

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Unknown event signature: {0}")]
    UnknownEvent(B256),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Timestamp unavailable for block {block}: {reason}")]
    TimestampUnavailable { block: u64, reason: String },

    #[error("Timeout waiting for data")]
    Timeout,

    #[error("Listener task failed: {0}")]
    TaskFailed(String),
}

impl FeedError {
    /// Whether this error means the transport could not be brought up at all.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            FeedError::ConnectionFailed(_) | FeedError::SubscriptionFailed(_)
        )
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::InvalidMessage(e.to_string())
    }
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
pub type FeedResult<T> = Result<T, FeedError>;
