//! Connection abstraction consumed from the transport layer
//!
//! The coordinator never frames bytes itself. It opens connections, sends
//! commands and data through them, tells them where incoming data should go,
//! and is called back through [`TransportEvents`] when something happens.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::DataLocation;
use crate::error::TransferError;

pub mod memory;
pub mod messages;

pub use memory::{LocalNetwork, MemoryTransport};
pub use messages::Command;

/// Identity of one end of a connection
pub type ConnectionId = Uuid;

/// Data handed to the receiving side
#[derive(Debug, Clone, PartialEq)]
pub enum ReceivedData {
    /// A file was written to the path armed with `receive_data_file`
    File(std::path::PathBuf),

    /// An in-memory object
    Object(serde_json::Value),

    /// One frame of a byte buffer; `last` marks the final frame
    Buffer { bytes: Vec<u8>, last: bool },
}

/// One end of a point-to-point connection
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    fn id(&self) -> ConnectionId;

    /// Name of the node at the other end
    fn peer(&self) -> &str;

    async fn send_command(&self, command: Command) -> Result<(), TransferError>;

    async fn send_data_file(&self, path: &Path) -> Result<(), TransferError>;

    async fn send_data_object(&self, value: serde_json::Value) -> Result<(), TransferError>;

    async fn send_data_byte_buffer(&self, bytes: Vec<u8>) -> Result<(), TransferError>;

    /// Incoming file data on this connection lands at `path`
    fn receive_data_file(&self, path: &Path);

    /// Incoming data on this connection is expected to be an object
    fn receive_data_object(&self);

    /// Incoming data on this connection is expected to be a byte buffer
    fn receive_data_byte_buffer(&self);

    /// Close the connection; both ends are told through `connection_finished`
    async fn finish(&self);
}

/// Opens connections to other nodes
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, location: &DataLocation) -> Result<Arc<dyn Connection>, TransferError>;
}

/// Callbacks the transport layer invokes, possibly from many tasks at once
#[async_trait]
pub trait TransportEvents: Send + Sync {
    async fn data_received(&self, connection: Arc<dyn Connection>, data: ReceivedData);

    async fn command_received(&self, connection: Arc<dyn Connection>, command: Command);

    async fn write_finished(&self, connection: Arc<dyn Connection>);

    async fn connection_finished(&self, connection: Arc<dyn Connection>);

    async fn error(&self, connection: Arc<dyn Connection>, error: TransferError);
}
