//! Transfer error types

use thiserror::Error;

/// Errors that can occur while moving a value between nodes
///
/// Every variant is recovered at the coordinator boundary and surfaced to the
/// registering consumers through their ticket, so the type is `Clone`: one
/// failure fans out to every request waiting on the same source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("Malformed binding identifier '{identifier}': {reason}")]
    MalformedIdentifier { identifier: String, reason: String },

    #[error("Failed to materialize '{name}' to a file: {reason}")]
    SerializationError { name: String, reason: String },

    #[error("Data not available: {source_id} ({reason})")]
    DataNotAvailable { source_id: String, reason: String },

    #[error("Connection fault: {0}")]
    ConnectionFault(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Channel closed before a reply arrived")]
    ChannelClosed,
}

impl TransferError {
    /// Shorthand for a `DataNotAvailable` error
    pub fn not_available(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataNotAvailable {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    /// Check if consumers see this error as "value unavailable"
    ///
    /// Local I/O and channel failures are also reported that way, but they are
    /// not part of the transfer protocol taxonomy.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            TransferError::MalformedIdentifier { .. }
                | TransferError::SerializationError { .. }
                | TransferError::DataNotAvailable { .. }
                | TransferError::ConnectionFault(_)
        )
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::Io(format!("JSON error: {}", err))
    }
}
