//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding change-feed payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The payload is not valid JSON or has the wrong shape.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The event type is not one of INSERT, UPDATE, DELETE.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// A required section of the payload is missing.
    #[error("{event} event is missing its `{field}` record")]
    MissingRecord {
        /// Event type.
        event: &'static str,
        /// Missing section (`new` or `old`).
        field: &'static str,
    },

    /// The record could not be decoded into the target type.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl ProtocolError {
    /// Creates a malformed-payload error from any displayable cause.
    pub fn malformed(cause: impl std::fmt::Display) -> Self {
        Self::Malformed(cause.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::MissingRecord {
            event: "INSERT",
            field: "new",
        };
        assert_eq!(err.to_string(), "INSERT event is missing its `new` record");

        let err = ProtocolError::UnknownEventType("TRUNCATE".into());
        assert!(err.to_string().contains("TRUNCATE"));
    }
}
