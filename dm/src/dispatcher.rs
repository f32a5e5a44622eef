//! Routes transport callbacks to the coordinator

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::coordinator::Coordinator;
use crate::error::TransferError;
use crate::transport::{Command, Connection, ReceivedData, TransportEvents};

/// Thin adapter between the transport layer and a [`Coordinator`]
pub struct MessageDispatcher {
    coordinator: Arc<Coordinator>,
}

impl MessageDispatcher {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }
}

#[async_trait]
impl TransportEvents for MessageDispatcher {
    async fn data_received(&self, connection: Arc<dyn Connection>, data: ReceivedData) {
        match data {
            ReceivedData::Buffer { bytes, last: false } => self.coordinator.receive_partial(connection, bytes).await,
            complete => self.coordinator.receive_data(connection, complete).await,
        }
    }

    async fn command_received(&self, connection: Arc<dyn Connection>, command: Command) {
        self.coordinator.handle_command(connection, command).await;
    }

    async fn write_finished(&self, connection: Arc<dyn Connection>) {
        self.coordinator.release_send(connection.id()).await;
    }

    async fn connection_finished(&self, connection: Arc<dyn Connection>) {
        self.coordinator.connection_closed(connection).await;
    }

    async fn error(&self, connection: Arc<dyn Connection>, err: TransferError) {
        debug!(node = %self.coordinator.node(), peer = %connection.peer(), error = %err, "MessageDispatcher::error: called");
        if self.coordinator.check_not_available(&connection, &err).await {
            return;
        }
        if self.coordinator.check_command_error(&connection, &err).await {
            return;
        }
        error!(node = %self.coordinator.node(), peer = %connection.peer(), error = %err, "Unhandled transport error");
    }
}
