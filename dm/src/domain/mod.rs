//! Domain types for the transfer coordinator
//!
//! Requests describe one consumer's need for a value, kinds describe how the
//! value is represented and how it crosses the wire, outcomes describe what
//! the consumer is eventually told.

mod kind;
mod outcome;
mod request;

pub use kind::{DataKind, TransferKind};
pub use outcome::{Delivery, TransferFailure, TransferOutcome, TransferTicket};
pub use request::{DataLocation, DataSource, TransferRequest};
