//! Coordinator construction, queries, and the receiver role

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use super::config::CoordinatorConfig;
use super::metrics::{Counters, QueueState, TransferMetrics};
use super::state::{CoordinatorState, OngoingTransfer};
use crate::binding::BindingObjectDescriptor;
use crate::domain::{DataSource, Delivery, TransferFailure, TransferKind, TransferRequest, TransferTicket};
use crate::error::TransferError;
use crate::registry::{RegisterResult, Registration, TargetGroup, group_by_target};
use crate::slots::{SlotPermit, SlotPool};
use crate::store::{DataStore, NoFallback, PathFallback, ReceivedValue};
use crate::transport::{Command, Connection, ConnectionId, ReceivedData, Transport};

/// Moves values between this node and its peers
///
/// Acts as receiver for the requests registered locally and as sender for the
/// demands peers send it. All bookkeeping lives in one [`CoordinatorState`]
/// behind one lock that is never held across a network call.
pub struct Coordinator {
    pub(super) node: String,
    pub(super) config: CoordinatorConfig,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) store: Arc<dyn DataStore>,
    pub(super) fallback: Arc<dyn PathFallback>,
    pub(super) send_slots: Arc<SlotPool>,
    pub(super) receive_slots: Arc<SlotPool>,
    pub(super) state: Mutex<CoordinatorState>,
    pub(super) terminated: AtomicBool,
    pub(super) terminated_tx: watch::Sender<bool>,
    pub(super) counters: Counters,
}

impl Coordinator {
    /// Create a coordinator that never relocates missing files
    pub fn new(
        node: impl Into<String>,
        config: CoordinatorConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn DataStore>,
    ) -> eyre::Result<Self> {
        Self::with_fallback(node, config, transport, store, Arc::new(NoFallback))
    }

    /// Create a coordinator with a strategy for files that moved
    pub fn with_fallback(
        node: impl Into<String>,
        config: CoordinatorConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn DataStore>,
        fallback: Arc<dyn PathFallback>,
    ) -> eyre::Result<Self> {
        let node = node.into();
        debug!(%node, ?config, "Coordinator::new: called");
        config.validate()?;

        let (terminated_tx, _) = watch::channel(false);
        Ok(Self {
            send_slots: Arc::new(SlotPool::new("send", config.max_send_slots)),
            receive_slots: Arc::new(SlotPool::new("receive", config.max_receive_slots)),
            node,
            config,
            transport,
            store,
            fallback,
            state: Mutex::new(CoordinatorState::default()),
            terminated: AtomicBool::new(false),
            terminated_tx,
            counters: Counters::default(),
        })
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Register a consumer's need for a value
    ///
    /// The first request for a source is queued for a network transfer; later
    /// requests for the same source ride along on it. The returned ticket
    /// resolves once the source is delivered or declared unavailable.
    pub async fn add_transfer_request(&self, request: TransferRequest) -> TransferTicket {
        debug!(node = %self.node, source_id = %request.source.id, target = %request.target, "Coordinator::add_transfer_request: called");
        let (registration, ticket) = Registration::new(request);

        let result = self.state.lock().await.registry.register(registration);
        match result {
            RegisterResult::Queued { position } => {
                debug!(node = %self.node, source_id = %ticket.source_id(), position, "Coordinator::add_transfer_request: queued");
            }
            RegisterResult::Coalesced { waiting } => {
                debug!(node = %self.node, source_id = %ticket.source_id(), waiting, "Coordinator::add_transfer_request: coalesced");
                Counters::bump(&self.counters.coalesced_requests);
            }
        }

        self.after_transfer().await;
        ticket
    }

    /// Whether anything is queued, in flight, or holding a slot
    pub async fn has_pending_transfers(&self) -> bool {
        let state = self.state.lock().await;
        state.has_pending() || self.receive_slots.in_use() > 0 || self.send_slots.in_use() > 0
    }

    pub async fn queue_state(&self) -> QueueState {
        let state = self.state.lock().await;
        QueueState {
            queued: state.registry.queued(),
            in_flight: state.ongoing.len(),
            delivering: state.delivering,
            waiting_requests: state.registry.waiting(),
            receive_slots_in_use: self.receive_slots.in_use(),
            receive_slots: self.receive_slots.capacity(),
            send_slots_in_use: self.send_slots.in_use(),
            send_slots: self.send_slots.capacity(),
            parked_sends: state.parked.len(),
            finishing: state.shutdown.finishing,
        }
    }

    pub fn metrics(&self) -> TransferMetrics {
        self.counters.snapshot()
    }

    /// Highest number of concurrent (receive, send) transfers seen so far
    pub fn peak_slots(&self) -> (usize, usize) {
        (self.receive_slots.peak(), self.send_slots.peak())
    }

    /// Admit queued requests while receive slots are free
    pub(super) async fn admit(&self) {
        loop {
            let admitted = self.state.lock().await.registry.take_admitted(&self.receive_slots);
            let Some((request, permit)) = admitted else {
                break;
            };
            self.start_transfer(request, permit).await;
        }
    }

    /// Re-run admission, then see whether a pending shutdown can complete
    pub(super) async fn after_transfer(&self) {
        self.admit().await;
        self.check_shutdown().await;
    }

    async fn start_transfer(&self, request: TransferRequest, permit: SlotPermit) {
        let source_id = request.source.id.clone();
        info!(node = %self.node, %source_id, "Admitted transfer");

        let kind = match TransferKind::resolve(request.kind, &source_id, self.config.persistent_bindings) {
            Ok(kind) => kind,
            Err(e) => {
                self.abandon(&source_id, e, permit).await;
                return;
            }
        };

        let connection = match self.connect(&request.source).await {
            Ok(connection) => connection,
            Err(e) => {
                self.abandon(&source_id, e, permit).await;
                return;
            }
        };

        let target_path = self.store.target_path(&request.target);
        match kind {
            TransferKind::File | TransferKind::BindingFileBacked => connection.receive_data_file(&target_path),
            TransferKind::Object => {
                // Peers may answer with the serialized file instead
                connection.receive_data_object();
                connection.receive_data_file(&target_path);
            }
            TransferKind::BindingRawBuffer | TransferKind::BindingNativeStream => connection.receive_data_byte_buffer(),
        }

        self.state.lock().await.ongoing.insert(
            connection.id(),
            OngoingTransfer {
                source_id: source_id.clone(),
                kind,
                connection: Arc::clone(&connection),
                buffer: Vec::new(),
                slot: permit,
            },
        );

        let demand = Command::DemandData {
            source: source_id.clone(),
            kind: request.kind,
            persistent: self.config.persistent_bindings,
        };
        match connection.send_command(demand).await {
            Ok(()) => {
                debug!(node = %self.node, %source_id, peer = %connection.peer(), ?kind, "Coordinator::start_transfer: demand sent");
                Counters::bump(&self.counters.demands_issued);
            }
            Err(e) => {
                self.fail_transfer(connection.id(), e).await;
            }
        }
    }

    /// Open a connection to the first reachable location
    async fn connect(&self, source: &DataSource) -> Result<Arc<dyn Connection>, TransferError> {
        if source.locations.is_empty() {
            return Err(TransferError::not_available(&source.id, "no known location"));
        }

        let mut last_error = None;
        for location in &source.locations {
            match self.transport.open(location).await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    warn!(node = %self.node, source_id = %source.id, %location, error = %e, "Location unreachable");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| TransferError::ConnectionFault(format!("no reachable location for {}", source.id))))
    }

    /// Fail a source that never got as far as a connection
    async fn abandon(&self, source_id: &str, error: TransferError, permit: SlotPermit) {
        warn!(node = %self.node, %source_id, %error, "Transfer abandoned");
        let drained = self.state.lock().await.registry.drain(source_id);
        drop(permit);
        self.notify_failure(source_id, drained, error);
    }

    /// Accumulate one frame of a byte buffer
    pub async fn receive_partial(&self, connection: Arc<dyn Connection>, bytes: Vec<u8>) {
        let mut state = self.state.lock().await;
        match state.ongoing.get_mut(&connection.id()) {
            Some(record) => {
                debug!(node = %self.node, source_id = %record.source_id, len = bytes.len(), "Coordinator::receive_partial: called");
                record.buffer.extend_from_slice(&bytes);
            }
            None => {
                warn!(node = %self.node, peer = %connection.peer(), "Partial buffer with no transfer in flight");
            }
        }
    }

    /// Complete a transfer: store the value and settle every waiting request
    ///
    /// The receive slot goes back to the pool as soon as the data is in, so
    /// the next queued source is admitted while this one is being stored.
    pub async fn receive_data(&self, connection: Arc<dyn Connection>, data: ReceivedData) {
        let taken = {
            let mut state = self.state.lock().await;
            state.ongoing.remove(&connection.id()).map(|record| {
                let OngoingTransfer {
                    source_id,
                    kind,
                    buffer,
                    slot,
                    ..
                } = record;
                drop(slot);
                let registrations = state.registry.drain(&source_id);
                state.delivering += 1;
                (source_id, kind, buffer, registrations)
            })
        };

        let Some((source_id, kind, buffer, registrations)) = taken else {
            warn!(node = %self.node, peer = %connection.peer(), "Data with no transfer in flight");
            return;
        };
        debug!(node = %self.node, %source_id, ?kind, "Coordinator::receive_data: called");

        self.admit().await;

        match received_value(&source_id, kind, buffer, data) {
            Ok(value) => self.deliver(&source_id, kind, value, registrations).await,
            Err(e) => {
                warn!(node = %self.node, %source_id, error = %e, "Received payload rejected");
                self.notify_failure(&source_id, registrations, e);
            }
        }

        self.state.lock().await.delivering -= 1;
        connection.finish().await;
        self.after_transfer().await;
    }

    /// Persist under the first target, copy locally to the others
    ///
    /// Every request for the source is settled the same way: if any target
    /// could not be produced, all of them fail.
    async fn deliver(&self, source_id: &str, kind: TransferKind, value: ReceivedValue, registrations: Vec<Registration>) {
        let groups = group_by_target(registrations);
        let Some(primary) = groups.first().map(|g| g.target.clone()) else {
            debug!(node = %self.node, %source_id, "Coordinator::deliver: no consumers left");
            return;
        };

        if let Err(e) = self.store_targets(&primary, kind, value, &groups).await {
            warn!(node = %self.node, %source_id, error = %e, "Failed to store received value");
            self.notify_groups(source_id, groups, e);
            return;
        }

        info!(node = %self.node, %source_id, targets = groups.len(), "Delivered transfer");
        for (i, group) in groups.into_iter().enumerate() {
            for registration in group.registrations {
                Counters::bump(&self.counters.deliveries);
                registration.resolve(Ok(Delivery {
                    source_id: source_id.to_string(),
                    target: group.target.clone(),
                    local_copy: i > 0,
                }));
            }
        }
    }

    async fn store_targets(
        &self,
        primary: &str,
        kind: TransferKind,
        value: ReceivedValue,
        groups: &[TargetGroup],
    ) -> Result<(), TransferError> {
        self.store.persist(primary, value).await?;
        for group in groups.iter().skip(1) {
            self.store.duplicate(primary, &group.target, kind).await?;
            Counters::bump(&self.counters.local_copies);
        }
        Ok(())
    }

    /// Fail the transfer bound to a connection, if there is one
    ///
    /// Returns whether a transfer was found. Admission is left to the caller.
    pub(super) async fn fail_transfer(&self, id: ConnectionId, error: TransferError) -> bool {
        let taken = {
            let mut state = self.state.lock().await;
            state.ongoing.remove(&id).map(|record| {
                let OngoingTransfer {
                    source_id,
                    connection,
                    slot,
                    ..
                } = record;
                drop(slot);
                let registrations = state.registry.drain(&source_id);
                (source_id, connection, registrations)
            })
        };

        let Some((source_id, connection, registrations)) = taken else {
            return false;
        };
        warn!(node = %self.node, %source_id, %error, "Transfer failed");
        self.notify_failure(&source_id, registrations, error);
        connection.finish().await;
        true
    }

    /// Offer a transport error to the in-flight receive on that connection
    pub async fn check_not_available(&self, connection: &Arc<dyn Connection>, error: &TransferError) -> bool {
        let handled = self.fail_transfer(connection.id(), error.clone()).await;
        if handled {
            self.after_transfer().await;
        }
        handled
    }

    fn notify_failure(&self, source_id: &str, registrations: Vec<Registration>, error: TransferError) {
        self.notify_groups(source_id, group_by_target(registrations), error);
    }

    fn notify_groups(&self, source_id: &str, groups: Vec<TargetGroup>, error: TransferError) {
        for group in groups {
            for registration in group.registrations {
                Counters::bump(&self.counters.failures);
                registration.resolve(Err(TransferFailure {
                    source_id: source_id.to_string(),
                    targets: vec![group.target.clone()],
                    error: error.clone(),
                }));
            }
        }
    }

    /// Route a command from a peer
    pub async fn handle_command(&self, connection: Arc<dyn Connection>, command: Command) {
        debug!(node = %self.node, peer = %connection.peer(), command = command.name(), "Coordinator::handle_command: called");
        match command {
            Command::DemandData {
                source,
                kind,
                persistent,
            } => self.handle_demand(connection, source, kind, persistent).await,
            Command::DataNotAvailable { source, reason } => {
                let error = TransferError::not_available(source, reason);
                if self.fail_transfer(connection.id(), error).await {
                    self.after_transfer().await;
                }
            }
            Command::Shutdown => self.received_shutdown(connection).await,
            Command::ShutdownAck => self.shutdown_acknowledged(connection.id()).await,
        }
    }

    /// Bookkeeping once a connection is gone
    pub async fn connection_closed(&self, connection: Arc<dyn Connection>) {
        let id = connection.id();
        debug!(node = %self.node, peer = %connection.peer(), "Coordinator::connection_closed: called");

        let fault = TransferError::ConnectionFault(format!("connection to {} closed before data arrived", connection.peer()));
        if self.fail_transfer(id, fault).await {
            self.after_transfer().await;
        }

        let released = {
            let mut state = self.state.lock().await;
            state.parked.retain(|demand| demand.connection.id() != id);
            if state.awaiting_acks.remove(&id).is_some() {
                debug!(node = %self.node, "Coordinator::connection_closed: dropped shutdown waiter");
            }
            state.shutdown.requesters.retain(|requester| requester.id() != id);
            state.sending.remove(&id).is_some()
        };

        if released {
            self.drain_parked().await;
        }
        self.check_shutdown().await;
    }
}

/// Turn a payload into the value to persist, given the expected wire kind
fn received_value(
    source_id: &str,
    kind: TransferKind,
    mut buffer: Vec<u8>,
    data: ReceivedData,
) -> Result<ReceivedValue, TransferError> {
    let descriptor = || BindingObjectDescriptor::decode(source_id);

    match (kind, data) {
        (TransferKind::File, ReceivedData::File(path)) => Ok(ReceivedValue::File(path)),
        (TransferKind::Object, ReceivedData::Object(value)) => Ok(ReceivedValue::Object(value)),
        (TransferKind::Object, ReceivedData::File(path)) => Ok(ReceivedValue::File(path)),
        (TransferKind::BindingRawBuffer, ReceivedData::Buffer { bytes, .. }) => {
            let descriptor = descriptor()?;
            buffer.extend_from_slice(&bytes);
            Ok(ReceivedValue::BindingBuffer {
                descriptor,
                bytes: buffer,
            })
        }
        (TransferKind::BindingNativeStream, ReceivedData::Buffer { bytes, .. }) => {
            let descriptor = descriptor()?;
            buffer.extend_from_slice(&bytes);
            Ok(ReceivedValue::BindingNative {
                descriptor,
                bytes: buffer,
            })
        }
        (TransferKind::BindingFileBacked, ReceivedData::File(path)) => Ok(ReceivedValue::BindingFile {
            descriptor: descriptor()?,
            path,
        }),
        (kind, data) => Err(TransferError::ConnectionFault(format!(
            "unexpected {} payload for {:?} transfer",
            payload_name(&data),
            kind
        ))),
    }
}

fn payload_name(data: &ReceivedData) -> &'static str {
    match data {
        ReceivedData::File(_) => "file",
        ReceivedData::Object(_) => "object",
        ReceivedData::Buffer { .. } => "byte buffer",
    }
}
