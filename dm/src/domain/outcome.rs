//! What a consumer is told once its request settles

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::TransferError;

/// A value was materialized under the consumer's target name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub source_id: String,
    pub target: String,
    /// The target was produced by copying another target locally, not by the
    /// network transfer itself
    pub local_copy: bool,
}

/// A value could not be provided
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Transfer of {source_id} failed for targets {targets:?}: {error}")]
pub struct TransferFailure {
    pub source_id: String,
    /// The consumer's own targets that were not met
    pub targets: Vec<String>,
    #[source]
    pub error: TransferError,
}

pub type TransferOutcome = Result<Delivery, TransferFailure>;

/// Handle returned to a consumer when it registers a request
///
/// Resolves exactly once. A consumer that no longer cares may drop it; the
/// transfer still runs for the other consumers of the same source.
#[derive(Debug)]
pub struct TransferTicket {
    source_id: String,
    target: String,
    rx: oneshot::Receiver<TransferOutcome>,
}

impl TransferTicket {
    pub(crate) fn new(source_id: String, target: String, rx: oneshot::Receiver<TransferOutcome>) -> Self {
        Self { source_id, target, rx }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Wait for the outcome
    pub async fn wait(self) -> TransferOutcome {
        debug!(source_id = %self.source_id, target = %self.target, "TransferTicket::wait: called");
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransferFailure {
                source_id: self.source_id,
                targets: vec![self.target],
                error: TransferError::ChannelClosed,
            }),
        }
    }
}
