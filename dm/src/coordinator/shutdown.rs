//! Shutdown handshake
//!
//! A peer (or the local process) asks this node to finish. From then on every
//! path that releases a slot or settles a transfer re-checks whether the node
//! is drained. The check and the `terminated` flip happen under the state
//! lock, so only one caller ever observes "all clear" and fires the terminal
//! action.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use super::core::Coordinator;
use crate::domain::DataLocation;
use crate::error::TransferError;
use crate::transport::{Command, Connection, ConnectionId};

impl Coordinator {
    /// A peer asked this node to shut down once drained
    pub async fn received_shutdown(&self, requester: Arc<dyn Connection>) {
        info!(node = %self.node, peer = %requester.peer(), "Shutdown requested");

        let already_terminated = {
            let mut state = self.state.lock().await;
            if self.terminated.load(Ordering::Acquire) {
                true
            } else {
                state.shutdown.finishing = true;
                state.shutdown.requesters.push(Arc::clone(&requester));
                false
            }
        };

        if already_terminated {
            debug!(node = %self.node, "Coordinator::received_shutdown: already terminated, acknowledging");
            acknowledge(&self.node, &requester).await;
            return;
        }
        self.check_shutdown().await;
    }

    /// Start the handshake locally, with nobody to acknowledge
    pub async fn shutdown_local(&self) {
        info!(node = %self.node, "Local shutdown requested");
        self.state.lock().await.shutdown.finishing = true;
        self.check_shutdown().await;
    }

    /// Ask a peer to shut down and wait for its acknowledgement
    ///
    /// Fails with `ChannelClosed` if the connection goes away before the
    /// acknowledgement arrives.
    pub async fn request_shutdown(&self, location: &DataLocation) -> Result<(), TransferError> {
        debug!(node = %self.node, %location, "Coordinator::request_shutdown: called");
        let connection = self.transport.open(location).await?;
        let id = connection.id();

        let (tx, rx) = oneshot::channel();
        self.state.lock().await.awaiting_acks.insert(id, tx);

        if let Err(e) = connection.send_command(Command::Shutdown).await {
            self.state.lock().await.awaiting_acks.remove(&id);
            return Err(e);
        }

        let acked = rx.await.map_err(|_| TransferError::ChannelClosed);
        connection.finish().await;
        if acked.is_ok() {
            info!(node = %self.node, %location, "Peer acknowledged shutdown");
        }
        acked
    }

    pub(super) async fn shutdown_acknowledged(&self, id: ConnectionId) {
        let waiter = self.state.lock().await.awaiting_acks.remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => warn!(node = %self.node, %id, "Shutdown acknowledgement nobody was waiting for"),
        }
    }

    /// Fire the terminal action if finishing and fully drained
    pub(super) async fn check_shutdown(&self) {
        let requesters = {
            let mut state = self.state.lock().await;
            if !state.shutdown.finishing
                || state.has_pending()
                || self.receive_slots.in_use() > 0
                || self.send_slots.in_use() > 0
            {
                return;
            }
            if self
                .terminated
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            std::mem::take(&mut state.shutdown.requesters)
        };

        info!(node = %self.node, requesters = requesters.len(), "Transfers drained, shutting down");
        for requester in &requesters {
            acknowledge(&self.node, requester).await;
        }
        self.terminated_tx.send_replace(true);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Watch the terminal flag; it flips to `true` once and stays there
    pub fn terminated(&self) -> watch::Receiver<bool> {
        self.terminated_tx.subscribe()
    }

    /// Resolve once the terminal action has fired
    pub async fn wait_terminated(&self) {
        let mut rx = self.terminated();
        // The sender lives as long as self, so this only returns once flipped
        let _ = rx.wait_for(|done| *done).await;
    }
}

async fn acknowledge(node: &str, requester: &Arc<dyn Connection>) {
    if let Err(e) = requester.send_command(Command::ShutdownAck).await {
        warn!(%node, peer = %requester.peer(), error = %e, "Failed to acknowledge shutdown");
    }
}
