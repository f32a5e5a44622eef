//! State owned by one coordinator behind a single lock

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::domain::{DataKind, TransferKind};
use crate::registry::RequestRegistry;
use crate::slots::SlotPermit;
use crate::transport::{Connection, ConnectionId};

/// A receive in flight on one connection
///
/// Holds the receive slot. Whoever removes the record from `ongoing` drops the
/// slot under the same lock.
#[derive(Debug)]
pub(crate) struct OngoingTransfer {
    pub source_id: String,
    pub kind: TransferKind,
    pub connection: Arc<dyn Connection>,
    /// Byte-buffer frames received so far
    pub buffer: Vec<u8>,
    pub slot: SlotPermit,
}

/// A demand waiting for a send slot
#[derive(Debug)]
pub(crate) struct ParkedDemand {
    pub connection: Arc<dyn Connection>,
    pub source: String,
    pub kind: DataKind,
    pub persistent: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ShutdownState {
    pub finishing: bool,
    /// Connections to acknowledge once drained; empty for a local shutdown
    pub requesters: Vec<Arc<dyn Connection>>,
}

#[derive(Debug, Default)]
pub(crate) struct CoordinatorState {
    pub registry: RequestRegistry,
    pub ongoing: HashMap<ConnectionId, OngoingTransfer>,
    /// Send slots held per connection, released when the write finishes
    pub sending: HashMap<ConnectionId, SlotPermit>,
    pub parked: VecDeque<ParkedDemand>,
    /// Received values still being stored under their targets
    pub delivering: usize,
    /// Outbound `Shutdown` commands waiting for their acknowledgement
    pub awaiting_acks: HashMap<ConnectionId, oneshot::Sender<()>>,
    pub shutdown: ShutdownState,
}

impl CoordinatorState {
    /// Anything queued, in flight, or waiting on a slot
    pub fn has_pending(&self) -> bool {
        self.registry.queued() > 0
            || !self.ongoing.is_empty()
            || self.delivering > 0
            || !self.sending.is_empty()
            || !self.parked.is_empty()
    }
}
