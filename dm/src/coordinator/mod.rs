//! Transfer coordinator
//!
//! One coordinator per node plays both roles:
//! - **Receiver:** admits registered requests under the receive slot limit,
//!   demands each source once, and fans the result out to every waiting
//!   consumer
//! - **Sender:** answers demands under the send slot limit, falling back to a
//!   relocated file or an explicit "not available" reply
//!
//! A shutdown handshake lets a peer wait until the node has drained.

mod config;
mod core;
mod metrics;
mod sender;
mod shutdown;
mod state;

pub use self::config::CoordinatorConfig;
pub use self::core::Coordinator;
pub use self::metrics::{QueueState, TransferMetrics};
