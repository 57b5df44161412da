//! Error types for the sync engine.

use livesync_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the engine.
///
/// None of these are fatal: the engine records them in the subscription
/// state and keeps serving the last known-good mirror.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Change feed failed to open or closed unexpectedly.
    #[error("connection error: {0}")]
    Connection(String),

    /// Change feed did not report `Connected` in time.
    #[error("change feed did not connect within {0:?}")]
    ConnectTimeout(Duration),

    /// A `fetch_all` call failed.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// A change payload could not be decoded; the event was dropped.
    #[error("malformed event: {0}")]
    MalformedEvent(#[from] ProtocolError),

    /// The collection has been torn down.
    #[error("live collection torn down")]
    TornDown,
}

impl SyncError {
    /// Returns true for change-feed failures.
    pub fn is_connection(&self) -> bool {
        matches!(self, SyncError::Connection(_) | SyncError::ConnectTimeout(_))
    }

    /// Returns true for fetch failures.
    pub fn is_fetch(&self) -> bool {
        matches!(self, SyncError::Fetch(_))
    }
}

/// Errors reported by a record store implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// A subscription could not be established.
    #[error("subscription failed: {0}")]
    Subscribe(String),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Subscribe(msg) => SyncError::Connection(msg),
            other => SyncError::Fetch(other.to_string()),
        }
    }
}
