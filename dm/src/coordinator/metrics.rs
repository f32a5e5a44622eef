//! Transfer counters and queue snapshots

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters bumped from any callback context
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub demands_issued: AtomicU64,
    pub demands_served: AtomicU64,
    pub coalesced_requests: AtomicU64,
    pub deliveries: AtomicU64,
    pub local_copies: AtomicU64,
    pub failures: AtomicU64,
    pub not_available_sent: AtomicU64,
    pub parked_sends: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransferMetrics {
        TransferMetrics {
            demands_issued: self.demands_issued.load(Ordering::Relaxed),
            demands_served: self.demands_served.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            local_copies: self.local_copies.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            not_available_sent: self.not_available_sent.load(Ordering::Relaxed),
            parked_sends: self.parked_sends.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the coordinator counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetrics {
    /// Demand commands this node sent as a receiver
    pub demands_issued: u64,
    /// Demands this node answered with data as a sender
    pub demands_served: u64,
    /// Requests that joined an existing fan-out list
    pub coalesced_requests: u64,
    /// Consumer requests that resolved with a delivery
    pub deliveries: u64,
    /// Targets produced by local copy
    pub local_copies: u64,
    /// Consumer requests that resolved with a failure
    pub failures: u64,
    /// Demands answered with "data not available"
    pub not_available_sent: u64,
    /// Demands that waited for a send slot
    pub parked_sends: u64,
}

/// Snapshot of queue and slot usage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    pub queued: usize,
    pub in_flight: usize,
    /// Received values still being stored
    pub delivering: usize,
    pub waiting_requests: usize,
    pub receive_slots_in_use: usize,
    pub receive_slots: usize,
    pub send_slots_in_use: usize,
    pub send_slots: usize,
    pub parked_sends: usize,
    pub finishing: bool,
}
