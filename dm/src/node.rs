//! A coordinator wired to a transport

use std::sync::Arc;

use tracing::debug;

use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::dispatcher::MessageDispatcher;
use crate::store::{DataStore, NoFallback, PathFallback};
use crate::transport::{LocalNetwork, TransportEvents};

/// One node of a [`LocalNetwork`]
///
/// Owns the dispatcher the network calls back into; dropping the node makes
/// it unreachable.
pub struct TransferNode {
    name: String,
    network: Arc<LocalNetwork>,
    coordinator: Arc<Coordinator>,
    _events: Arc<dyn TransportEvents>,
}

impl TransferNode {
    /// Join `network` as `name`
    pub fn spawn_local(
        network: &Arc<LocalNetwork>,
        name: &str,
        config: CoordinatorConfig,
        store: Arc<dyn DataStore>,
    ) -> eyre::Result<Self> {
        Self::spawn_local_with_fallback(network, name, config, store, Arc::new(NoFallback))
    }

    pub fn spawn_local_with_fallback(
        network: &Arc<LocalNetwork>,
        name: &str,
        config: CoordinatorConfig,
        store: Arc<dyn DataStore>,
        fallback: Arc<dyn PathFallback>,
    ) -> eyre::Result<Self> {
        debug!(%name, "TransferNode::spawn_local: called");
        let transport = Arc::new(network.transport(name));
        let coordinator = Arc::new(Coordinator::with_fallback(name, config, transport, store, fallback)?);
        let events: Arc<dyn TransportEvents> = Arc::new(MessageDispatcher::new(Arc::clone(&coordinator)));
        network.join(name, &events);

        Ok(Self {
            name: name.to_string(),
            network: Arc::clone(network),
            coordinator,
            _events: events,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }
}

impl Drop for TransferNode {
    fn drop(&mut self) {
        self.network.leave(&self.name);
    }
}
