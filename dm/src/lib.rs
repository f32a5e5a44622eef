//! Datamover - moves named values between compute nodes
//!
//! A [`Coordinator`](coordinator::Coordinator) per node admits inbound and
//! outbound transfers under fixed slot limits, issues one network demand per
//! source value no matter how many consumers asked for it, and fans the result
//! out to every target name. Transport callbacks reach it through a
//! [`MessageDispatcher`](dispatcher::MessageDispatcher).

pub mod binding;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod node;
pub mod registry;
pub mod slots;
pub mod store;
pub mod transport;

pub use binding::{BindingObjectDescriptor, TransferPath};
pub use coordinator::{Coordinator, CoordinatorConfig, QueueState, TransferMetrics};
pub use dispatcher::MessageDispatcher;
pub use domain::{DataKind, DataLocation, DataSource, Delivery, TransferFailure, TransferKind, TransferRequest, TransferTicket};
pub use error::TransferError;
pub use node::TransferNode;
