//! Request registry: fan-out lists and the pending queue
//!
//! Every source identifier with outstanding interest owns one fan-out list.
//! Only the first request for a source enters the pending queue; later ones
//! join the list and ride along on the same network transfer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::debug;

use crate::domain::{TransferOutcome, TransferRequest, TransferTicket};
use crate::slots::{SlotPermit, SlotPool};

/// A registered request plus the channel its consumer waits on
#[derive(Debug)]
pub struct Registration {
    pub request: TransferRequest,
    reply: oneshot::Sender<TransferOutcome>,
}

impl Registration {
    /// Create a registration and the ticket its consumer keeps
    pub fn new(request: TransferRequest) -> (Self, TransferTicket) {
        let (reply, rx) = oneshot::channel();
        let ticket = TransferTicket::new(request.source.id.clone(), request.target.clone(), rx);
        (Self { request, reply }, ticket)
    }

    pub fn target(&self) -> &str {
        &self.request.target
    }

    /// Settle this registration; a consumer that dropped its ticket is ignored
    pub fn resolve(self, outcome: TransferOutcome) {
        if self.reply.send(outcome).is_err() {
            debug!(target = %self.request.target, "Registration::resolve: consumer no longer waiting");
        }
    }
}

/// Result of registering a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterResult {
    /// First request for the source; it was queued for a network transfer
    Queued { position: usize },

    /// Joined an existing fan-out list; no new transfer
    Coalesced { waiting: usize },
}

/// Requests grouped under one target name
#[derive(Debug)]
pub struct TargetGroup {
    pub target: String,
    pub registrations: Vec<Registration>,
}

/// Source identifier -> waiting requests, plus the admission queue
#[derive(Debug, Default)]
pub struct RequestRegistry {
    fan_out: HashMap<String, Vec<Registration>>,
    queue: VecDeque<TransferRequest>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a source
    pub fn register(&mut self, registration: Registration) -> RegisterResult {
        let source_id = registration.request.source.id.clone();
        debug!(%source_id, target = %registration.target(), "RequestRegistry::register: called");

        match self.fan_out.get_mut(&source_id) {
            Some(waiting) => {
                waiting.push(registration);
                RegisterResult::Coalesced { waiting: waiting.len() }
            }
            None => {
                self.queue.push_back(registration.request.clone());
                self.fan_out.insert(source_id, vec![registration]);
                RegisterResult::Queued {
                    position: self.queue.len(),
                }
            }
        }
    }

    /// Pop the queue head if the pool admits it
    ///
    /// The caller holds the registry exclusively, so two notification paths
    /// can never both take the same head.
    pub fn take_admitted(&mut self, pool: &Arc<SlotPool>) -> Option<(TransferRequest, SlotPermit)> {
        if self.queue.is_empty() {
            return None;
        }
        let permit = pool.try_permit()?;
        let request = self.queue.pop_front()?;
        debug!(source_id = %request.source.id, "RequestRegistry::take_admitted: admitted");
        Some((request, permit))
    }

    /// Remove and return every request waiting on a source
    pub fn drain(&mut self, source_id: &str) -> Vec<Registration> {
        let drained = self.fan_out.remove(source_id).unwrap_or_default();
        debug!(%source_id, count = drained.len(), "RequestRegistry::drain: called");
        drained
    }

    /// Requests waiting for admission
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Registrations across all sources
    pub fn waiting(&self) -> usize {
        self.fan_out.values().map(Vec::len).sum()
    }
}

/// Group drained registrations by target name, keeping first-seen order
///
/// Requests with identical targets collapse into one delivery target.
pub fn group_by_target(registrations: Vec<Registration>) -> Vec<TargetGroup> {
    let mut groups: Vec<TargetGroup> = Vec::new();
    for registration in registrations {
        match groups.iter_mut().find(|g| g.target == registration.target()) {
            Some(group) => group.registrations.push(registration),
            None => groups.push(TargetGroup {
                target: registration.target().to_string(),
                registrations: vec![registration],
            }),
        }
    }
    groups
}
