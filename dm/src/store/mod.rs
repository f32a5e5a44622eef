//! Local value storage
//!
//! The coordinator never touches the file system or the native binding
//! runtime directly. It asks a [`DataStore`] where incoming data should land,
//! what a local value currently looks like, and how to keep or copy a received
//! value under a target name.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::binding::BindingObjectDescriptor;
use crate::domain::{DataKind, TransferKind};
use crate::error::TransferError;

pub mod fallback;
pub mod fs;

pub use fallback::{NoFallback, PathFallback, RelocatedPathFallback};
pub use fs::FsDataStore;

/// Current representation of a value held by this node
#[derive(Debug, Clone, PartialEq)]
pub enum LocalValue {
    /// A file at this path (which may since have been moved away)
    File(PathBuf),

    /// An in-memory object
    Object(serde_json::Value),

    /// An object that only exists as a serialized file
    SerializedObject(PathBuf),

    /// A binding object present in the native runtime
    Binding(BindingObjectDescriptor),
}

/// A received value ready to be kept under a target name
#[derive(Debug, Clone, PartialEq)]
pub enum ReceivedValue {
    File(PathBuf),
    Object(serde_json::Value),
    BindingBuffer {
        descriptor: BindingObjectDescriptor,
        bytes: Vec<u8>,
    },
    BindingNative {
        descriptor: BindingObjectDescriptor,
        bytes: Vec<u8>,
    },
    BindingFile {
        descriptor: BindingObjectDescriptor,
        path: PathBuf,
    },
}

impl ReceivedValue {
    pub fn kind(&self) -> TransferKind {
        match self {
            Self::File(_) => TransferKind::File,
            Self::Object(_) => TransferKind::Object,
            Self::BindingBuffer { .. } => TransferKind::BindingRawBuffer,
            Self::BindingNative { .. } => TransferKind::BindingNativeStream,
            Self::BindingFile { .. } => TransferKind::BindingFileBacked,
        }
    }
}

/// Storage seam a deployment implements
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Where an incoming file for `target` should be written
    fn target_path(&self, target: &str) -> PathBuf;

    /// Look up the local representation of a value
    async fn resolve(&self, source_id: &str, kind: DataKind) -> Result<LocalValue, TransferError>;

    /// Raw bytes of a sized binding object
    async fn read_binding_buffer(&self, descriptor: &BindingObjectDescriptor) -> Result<Vec<u8>, TransferError>;

    /// Native stream export of an unsized binding object
    async fn export_native(&self, descriptor: &BindingObjectDescriptor) -> Result<Vec<u8>, TransferError>;

    /// Write a binding object to a file; failures are `SerializationError`
    async fn materialize_binding(&self, descriptor: &BindingObjectDescriptor) -> Result<PathBuf, TransferError>;

    /// Keep a received value under `target`
    async fn persist(&self, target: &str, value: ReceivedValue) -> Result<(), TransferError>;

    /// Copy an already persisted target to a second target name
    async fn duplicate(&self, from: &str, to: &str, kind: TransferKind) -> Result<(), TransferError>;
}
