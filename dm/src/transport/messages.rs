//! Command vocabulary exchanged between coordinators
//!
//! Tagged JSON, one command per frame.

use serde::{Deserialize, Serialize};

use crate::domain::DataKind;

/// Commands carried over a connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Command {
    /// Ask the peer to send a value
    ///
    /// The peer derives the wire transfer kind from `(kind, source, persistent)`
    /// exactly as the requester did.
    DemandData {
        source: String,
        kind: DataKind,
        persistent: bool,
    },

    /// The peer holds no valid copy of the demanded value
    DataNotAvailable { source: String, reason: String },

    /// Ask the peer to stop once its transfers drain
    Shutdown,

    /// The peer drained and stopped
    ShutdownAck,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::DemandData { .. } => "DemandData",
            Command::DataNotAvailable { .. } => "DataNotAvailable",
            Command::Shutdown => "Shutdown",
            Command::ShutdownAck => "ShutdownAck",
        }
    }
}
