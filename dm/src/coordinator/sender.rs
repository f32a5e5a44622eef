//! Sender role: answering demands from peers

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::core::Coordinator;
use super::metrics::Counters;
use super::state::ParkedDemand;
use crate::binding::BindingObjectDescriptor;
use crate::domain::{DataKind, TransferKind};
use crate::error::TransferError;
use crate::store::LocalValue;
use crate::transport::{Command, Connection, ConnectionId};

impl Coordinator {
    /// Serve a demand now, or park it until a send slot frees up
    pub(super) async fn handle_demand(&self, connection: Arc<dyn Connection>, source: String, kind: DataKind, persistent: bool) {
        debug!(node = %self.node, %source, %kind, persistent, "Coordinator::handle_demand: called");

        let admitted = {
            let mut state = self.state.lock().await;
            match self.send_slots.try_permit() {
                Some(permit) => {
                    state.sending.insert(connection.id(), permit);
                    true
                }
                None => {
                    state.parked.push_back(ParkedDemand {
                        connection: Arc::clone(&connection),
                        source: source.clone(),
                        kind,
                        persistent,
                    });
                    false
                }
            }
        };

        if !admitted {
            debug!(node = %self.node, %source, "Coordinator::handle_demand: send slots full, parked");
            Counters::bump(&self.counters.parked_sends);
            return;
        }

        self.serve(connection, source, kind, persistent).await;
        self.drain_parked().await;
        self.check_shutdown().await;
    }

    /// Release the send slot held for a connection once its write finished
    pub async fn release_send(&self, id: ConnectionId) {
        let released = self.state.lock().await.sending.remove(&id).is_some();
        if released {
            debug!(node = %self.node, %id, "Coordinator::release_send: slot released");
            self.drain_parked().await;
        }
        self.check_shutdown().await;
    }

    /// Serve parked demands while send slots are free
    pub(super) async fn drain_parked(&self) {
        loop {
            let next = {
                let mut state = self.state.lock().await;
                if state.parked.is_empty() {
                    break;
                }
                let Some(permit) = self.send_slots.try_permit() else {
                    break;
                };
                let Some(demand) = state.parked.pop_front() else {
                    break;
                };
                state.sending.insert(demand.connection.id(), permit);
                demand
            };

            debug!(node = %self.node, source = %next.source, "Coordinator::drain_parked: serving parked demand");
            self.serve(next.connection, next.source, next.kind, next.persistent).await;
        }
    }

    /// Send the value, or tell the requester it is unavailable
    ///
    /// On success the slot stays held until the transport reports the write
    /// finished. On failure it is released here.
    async fn serve(&self, connection: Arc<dyn Connection>, source: String, kind: DataKind, persistent: bool) {
        match self.send_value(&connection, &source, kind, persistent).await {
            Ok(()) => {
                debug!(node = %self.node, %source, peer = %connection.peer(), "Coordinator::serve: data sent");
                Counters::bump(&self.counters.demands_served);
            }
            Err(error) => {
                warn!(node = %self.node, %source, peer = %connection.peer(), %error, "Cannot serve demand");
                self.send_not_available(&connection, &source, &error).await;
                self.state.lock().await.sending.remove(&connection.id());
            }
        }
    }

    async fn send_value(
        &self,
        connection: &Arc<dyn Connection>,
        source: &str,
        kind: DataKind,
        persistent: bool,
    ) -> Result<(), TransferError> {
        match TransferKind::resolve(kind, source, persistent)? {
            TransferKind::File => match self.store.resolve(source, DataKind::File).await? {
                LocalValue::File(path) | LocalValue::SerializedObject(path) => {
                    let path = self.existing_or_relocated(source, path).await?;
                    connection.send_data_file(&path).await
                }
                other => Err(TransferError::not_available(
                    source,
                    format!("stored as {}, not a file", local_name(&other)),
                )),
            },
            TransferKind::Object => match self.store.resolve(source, DataKind::Object).await? {
                LocalValue::Object(value) => connection.send_data_object(value).await,
                LocalValue::SerializedObject(path) | LocalValue::File(path) => {
                    debug!(node = %self.node, %source, "Coordinator::send_value: object is serialized, sending file");
                    let path = self.existing_or_relocated(source, path).await?;
                    connection.send_data_file(&path).await
                }
                LocalValue::Binding(_) => Err(TransferError::not_available(source, "stored as a binding object")),
            },
            TransferKind::BindingRawBuffer => {
                let descriptor = BindingObjectDescriptor::decode(source)?;
                let bytes = self.store.read_binding_buffer(&descriptor).await?;
                connection.send_data_byte_buffer(bytes).await
            }
            TransferKind::BindingNativeStream => {
                let descriptor = BindingObjectDescriptor::decode(source)?;
                let bytes = self.store.export_native(&descriptor).await?;
                connection.send_data_byte_buffer(bytes).await
            }
            TransferKind::BindingFileBacked => {
                let descriptor = BindingObjectDescriptor::decode(source)?;
                let path = self.store.materialize_binding(&descriptor).await?;
                connection.send_data_file(&path).await
            }
        }
    }

    /// The registered path if it still exists, else whatever the fallback finds
    async fn existing_or_relocated(&self, source: &str, path: PathBuf) -> Result<PathBuf, TransferError> {
        let exists = tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false);
        if exists {
            return Ok(path);
        }

        match self.fallback.relocate(&path) {
            Some(relocated) => {
                info!(node = %self.node, %source, from = ?path, to = ?relocated, "Serving relocated file");
                Ok(relocated)
            }
            None => Err(TransferError::not_available(
                source,
                format!("{} no longer exists", path.display()),
            )),
        }
    }

    async fn send_not_available(&self, connection: &Arc<dyn Connection>, source: &str, error: &TransferError) {
        Counters::bump(&self.counters.not_available_sent);
        let command = Command::DataNotAvailable {
            source: source.to_string(),
            reason: error.to_string(),
        };
        if let Err(e) = connection.send_command(command).await {
            warn!(node = %self.node, %source, error = %e, "Failed to report unavailability");
        }
    }

    /// Offer a transport error to outbound bookkeeping on that connection
    ///
    /// Covers a held send slot, an outbound shutdown waiting for its ack, and
    /// a peer waiting for ours.
    pub async fn check_command_error(&self, connection: &Arc<dyn Connection>, error: &TransferError) -> bool {
        let id = connection.id();
        let (released, waiter, requester) = {
            let mut state = self.state.lock().await;
            let released = state.sending.remove(&id).is_some();
            let waiter = state.awaiting_acks.remove(&id);
            let before = state.shutdown.requesters.len();
            state.shutdown.requesters.retain(|c| c.id() != id);
            (released, waiter.is_some(), state.shutdown.requesters.len() != before)
        };

        if !(released || waiter || requester) {
            return false;
        }

        warn!(node = %self.node, peer = %connection.peer(), %error, released, waiter, requester, "Command-level connection error");
        if released {
            self.drain_parked().await;
        }
        self.check_shutdown().await;
        true
    }
}

fn local_name(value: &LocalValue) -> &'static str {
    match value {
        LocalValue::File(_) => "file",
        LocalValue::Object(_) => "object",
        LocalValue::SerializedObject(_) => "serialized object",
        LocalValue::Binding(_) => "binding object",
    }
}
