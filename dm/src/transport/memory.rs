//! In-process transport
//!
//! Nodes join a [`LocalNetwork`] under a name. Opening a connection creates a
//! pair of endpoints joined by two ordered frame queues; a tokio task per
//! direction pumps frames into the receiving node's [`TransportEvents`].
//! Every data frame is followed by `write_finished` on the sending side, and
//! `finish()` on either end reports `connection_finished` to both ends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use super::messages::Command;
use super::{Connection, ConnectionId, ReceivedData, Transport, TransportEvents};
use crate::domain::DataLocation;
use crate::error::TransferError;

/// Default bytes per byte-buffer frame
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug)]
enum Frame {
    Command(Command),
    File(Vec<u8>),
    Object(serde_json::Value),
    Buffer(Vec<u8>),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expecting {
    Object,
    ByteBuffer,
}

#[derive(Debug, Default)]
struct Armed {
    file: Option<PathBuf>,
    expecting: Option<Expecting>,
}

/// Registry of named in-process nodes
pub struct LocalNetwork {
    nodes: Mutex<HashMap<String, Weak<dyn TransportEvents>>>,
    chunk_size: usize,
}

impl LocalNetwork {
    pub fn new(chunk_size: usize) -> Arc<Self> {
        debug!(chunk_size, "LocalNetwork::new: called");
        Arc::new(Self {
            nodes: Mutex::new(HashMap::new()),
            chunk_size: chunk_size.max(1),
        })
    }

    /// Make a node reachable; the network only keeps a weak reference
    pub fn join(&self, node: &str, events: &Arc<dyn TransportEvents>) {
        debug!(%node, "LocalNetwork::join: called");
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.to_string(), Arc::downgrade(events));
    }

    /// Make a node unreachable for new connections
    pub fn leave(&self, node: &str) {
        debug!(%node, "LocalNetwork::leave: called");
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner).remove(node);
    }

    /// Transport bound to one node of this network
    pub fn transport(self: &Arc<Self>, node: &str) -> MemoryTransport {
        MemoryTransport {
            network: Arc::clone(self),
            node: node.to_string(),
        }
    }

    fn events(&self, node: &str) -> Result<Arc<dyn TransportEvents>, TransferError> {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node)
            .and_then(Weak::upgrade)
            .ok_or_else(|| TransferError::ConnectionFault(format!("node {} is not reachable", node)))
    }

    fn connect(&self, from: &str, to: &str) -> Result<Arc<dyn Connection>, TransferError> {
        debug!(%from, %to, "LocalNetwork::connect: called");
        let local_events = self.events(from)?;
        let remote_events = self.events(to)?;

        let (closed_tx, _) = watch::channel(false);
        let closed = Arc::new(closed_tx);
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();

        let local = Arc::new(MemoryConnection::new(to, local_tx, Arc::clone(&closed)));
        let remote = Arc::new(MemoryConnection::new(from, remote_tx, Arc::clone(&closed)));

        tokio::spawn(
            Pump {
                rx: local_rx,
                closed: closed.subscribe(),
                local: Arc::clone(&local),
                local_events: Arc::clone(&local_events),
                remote: Arc::clone(&remote),
                remote_events: Arc::clone(&remote_events),
                chunk_size: self.chunk_size,
            }
            .run(),
        );
        tokio::spawn(
            Pump {
                rx: remote_rx,
                closed: closed.subscribe(),
                local: Arc::clone(&remote),
                local_events: remote_events,
                remote: Arc::clone(&local),
                remote_events: local_events,
                chunk_size: self.chunk_size,
            }
            .run(),
        );

        Ok(local)
    }
}

/// Transport for one node of a [`LocalNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    network: Arc<LocalNetwork>,
    node: String,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, location: &DataLocation) -> Result<Arc<dyn Connection>, TransferError> {
        self.network.connect(&self.node, &location.node)
    }
}

/// One endpoint of an in-process connection
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    peer: String,
    outbound: mpsc::UnboundedSender<Frame>,
    closed: Arc<watch::Sender<bool>>,
    closing: AtomicBool,
    armed: Mutex<Armed>,
}

impl MemoryConnection {
    fn new(peer: &str, outbound: mpsc::UnboundedSender<Frame>, closed: Arc<watch::Sender<bool>>) -> Self {
        Self {
            id: Uuid::now_v7(),
            peer: peer.to_string(),
            outbound,
            closed,
            closing: AtomicBool::new(false),
            armed: Mutex::new(Armed::default()),
        }
    }

    fn push(&self, frame: Frame) -> Result<(), TransferError> {
        if *self.closed.borrow() || self.closing.load(Ordering::Acquire) {
            return Err(TransferError::ConnectionFault(format!(
                "connection to {} is closed",
                self.peer
            )));
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransferError::ConnectionFault(format!("connection to {} is closed", self.peer)))
    }

    fn armed_file(&self) -> Option<PathBuf> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner).file.clone()
    }

    fn expecting(&self) -> Option<Expecting> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner).expecting
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    async fn send_command(&self, command: Command) -> Result<(), TransferError> {
        debug!(id = %self.id, peer = %self.peer, command = command.name(), "MemoryConnection::send_command: called");
        self.push(Frame::Command(command))
    }

    async fn send_data_file(&self, path: &Path) -> Result<(), TransferError> {
        debug!(id = %self.id, ?path, "MemoryConnection::send_data_file: called");
        let bytes = tokio::fs::read(path).await?;
        self.push(Frame::File(bytes))
    }

    async fn send_data_object(&self, value: serde_json::Value) -> Result<(), TransferError> {
        debug!(id = %self.id, "MemoryConnection::send_data_object: called");
        self.push(Frame::Object(value))
    }

    async fn send_data_byte_buffer(&self, bytes: Vec<u8>) -> Result<(), TransferError> {
        debug!(id = %self.id, len = bytes.len(), "MemoryConnection::send_data_byte_buffer: called");
        self.push(Frame::Buffer(bytes))
    }

    fn receive_data_file(&self, path: &Path) {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner).file = Some(path.to_path_buf());
    }

    fn receive_data_object(&self) {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner).expecting = Some(Expecting::Object);
    }

    fn receive_data_byte_buffer(&self) {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner).expecting = Some(Expecting::ByteBuffer);
    }

    async fn finish(&self) {
        if self.closing.swap(true, Ordering::AcqRel) || *self.closed.borrow() {
            return;
        }
        debug!(id = %self.id, peer = %self.peer, "MemoryConnection::finish: called");
        // The pump may already be gone if the peer closed first
        let _ = self.outbound.send(Frame::Close);
    }
}

/// Moves frames from one endpoint to the other, in order
struct Pump {
    rx: mpsc::UnboundedReceiver<Frame>,
    closed: watch::Receiver<bool>,
    local: Arc<MemoryConnection>,
    local_events: Arc<dyn TransportEvents>,
    remote: Arc<MemoryConnection>,
    remote_events: Arc<dyn TransportEvents>,
    chunk_size: usize,
}

impl Pump {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                frame = self.rx.recv() => match frame {
                    Some(Frame::Close) | None => {
                        self.close().await;
                        break;
                    }
                    Some(frame) => self.deliver(frame).await,
                },
                changed = self.closed.changed() => {
                    if changed.is_err() || *self.closed.borrow() {
                        break;
                    }
                }
            }
        }
    }

    fn local_conn(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.local) as Arc<dyn Connection>
    }

    fn remote_conn(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.remote) as Arc<dyn Connection>
    }

    async fn close(&self) {
        self.local.closed.send_replace(true);
        self.remote_events.connection_finished(self.remote_conn()).await;
        self.local_events.connection_finished(self.local_conn()).await;
    }

    async fn deliver(&self, frame: Frame) {
        match frame {
            Frame::Command(command) => {
                self.remote_events.command_received(self.remote_conn(), command).await;
                return;
            }
            Frame::File(bytes) => self.deliver_file(bytes).await,
            Frame::Object(value) => {
                if self.remote.expecting() != Some(Expecting::Object) {
                    debug!(id = %self.remote.id, "Pump::deliver: object arrived without object expectation");
                }
                self.remote_events
                    .data_received(self.remote_conn(), ReceivedData::Object(value))
                    .await;
            }
            Frame::Buffer(bytes) => self.deliver_buffer(bytes).await,
            Frame::Close => {}
        }
        self.local_events.write_finished(self.local_conn()).await;
    }

    async fn deliver_file(&self, bytes: Vec<u8>) {
        let Some(path) = self.remote.armed_file() else {
            warn!(id = %self.remote.id, "Pump::deliver_file: no file target armed");
            self.remote_events
                .error(
                    self.remote_conn(),
                    TransferError::ConnectionFault("file arrived with no target armed".to_string()),
                )
                .await;
            return;
        };

        match write_file(&path, &bytes).await {
            Ok(()) => {
                self.remote_events
                    .data_received(self.remote_conn(), ReceivedData::File(path))
                    .await;
            }
            Err(e) => {
                warn!(?path, error = %e, "Pump::deliver_file: failed to write received file");
                self.remote_events.error(self.remote_conn(), e).await;
            }
        }
    }

    async fn deliver_buffer(&self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            self.remote_events
                .data_received(self.remote_conn(), ReceivedData::Buffer { bytes, last: true })
                .await;
            return;
        }

        let frames = bytes.len().div_ceil(self.chunk_size);
        for (i, chunk) in bytes.chunks(self.chunk_size).enumerate() {
            self.remote_events
                .data_received(
                    self.remote_conn(),
                    ReceivedData::Buffer {
                        bytes: chunk.to_vec(),
                        last: i + 1 == frames,
                    },
                )
                .await;
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), TransferError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}
