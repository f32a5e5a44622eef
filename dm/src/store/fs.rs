//! File-system backed store
//!
//! Files live under a work directory, one file per name. Objects are kept in
//! memory as JSON values. Binding objects stand in for the native runtime as a
//! table of byte blobs keyed by descriptor name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{DataStore, LocalValue, ReceivedValue};
use crate::binding::BindingObjectDescriptor;
use crate::domain::{DataKind, TransferKind};
use crate::error::TransferError;

/// Extension of materialized binding files
pub const BINDING_FILE_EXT: &str = "bind";

pub struct FsDataStore {
    work_dir: PathBuf,
    objects: RwLock<HashMap<String, serde_json::Value>>,
    bindings: RwLock<HashMap<String, Vec<u8>>>,
}

impl FsDataStore {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        debug!(?work_dir, "FsDataStore::new: called");
        Self {
            work_dir,
            objects: RwLock::new(HashMap::new()),
            bindings: RwLock::new(HashMap::new()),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Path of the file stored under `name`
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.work_dir.join(file_name(name))
    }

    /// Seed a file under `name`
    pub async fn put_file(&self, name: &str, contents: &[u8]) -> Result<PathBuf, TransferError> {
        let path = self.path_for(name);
        tokio::fs::create_dir_all(&self.work_dir).await?;
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    pub async fn read_file(&self, name: &str) -> Result<Vec<u8>, TransferError> {
        Ok(tokio::fs::read(self.path_for(name)).await?)
    }

    pub async fn put_object(&self, name: &str, value: serde_json::Value) {
        self.objects.write().await.insert(name.to_string(), value);
    }

    pub async fn object(&self, name: &str) -> Option<serde_json::Value> {
        self.objects.read().await.get(name).cloned()
    }

    /// Seed a binding object in the native table
    pub async fn put_binding(&self, name: &str, bytes: Vec<u8>) {
        self.bindings.write().await.insert(binding_key(name), bytes);
    }

    pub async fn binding(&self, name: &str) -> Option<Vec<u8>> {
        self.bindings.read().await.get(&binding_key(name)).cloned()
    }

    async fn binding_bytes(&self, descriptor: &BindingObjectDescriptor) -> Result<Vec<u8>, TransferError> {
        self.bindings
            .read()
            .await
            .get(&descriptor.name)
            .cloned()
            .ok_or_else(|| TransferError::not_available(descriptor.encode(), "binding object is not loaded"))
    }

    async fn copy_file(&self, from: &str, to: &str) -> Result<(), TransferError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        tokio::fs::copy(self.path_for(from), self.path_for(to)).await?;
        Ok(())
    }
}

#[async_trait]
impl DataStore for FsDataStore {
    fn target_path(&self, target: &str) -> PathBuf {
        self.path_for(target)
    }

    async fn resolve(&self, source_id: &str, kind: DataKind) -> Result<LocalValue, TransferError> {
        debug!(%source_id, %kind, "FsDataStore::resolve: called");
        match kind {
            DataKind::File => Ok(LocalValue::File(self.path_for(source_id))),
            DataKind::Object => {
                if let Some(value) = self.objects.read().await.get(source_id) {
                    return Ok(LocalValue::Object(value.clone()));
                }
                let path = self.path_for(source_id);
                if path.is_file() {
                    Ok(LocalValue::SerializedObject(path))
                } else {
                    Err(TransferError::not_available(source_id, "no object or serialized copy"))
                }
            }
            DataKind::Binding => {
                let descriptor = BindingObjectDescriptor::decode(source_id)?;
                if self.bindings.read().await.contains_key(&descriptor.name) {
                    Ok(LocalValue::Binding(descriptor))
                } else {
                    Err(TransferError::not_available(source_id, "binding object is not loaded"))
                }
            }
        }
    }

    async fn read_binding_buffer(&self, descriptor: &BindingObjectDescriptor) -> Result<Vec<u8>, TransferError> {
        self.binding_bytes(descriptor).await
    }

    async fn export_native(&self, descriptor: &BindingObjectDescriptor) -> Result<Vec<u8>, TransferError> {
        self.binding_bytes(descriptor).await
    }

    async fn materialize_binding(&self, descriptor: &BindingObjectDescriptor) -> Result<PathBuf, TransferError> {
        let serialization = |reason: String| TransferError::SerializationError {
            name: descriptor.name.clone(),
            reason,
        };

        let bytes = self
            .bindings
            .read()
            .await
            .get(&descriptor.name)
            .cloned()
            .ok_or_else(|| serialization("binding object is not loaded".to_string()))?;

        let path = self
            .work_dir
            .join(format!("{}.{}", file_name(&descriptor.name), BINDING_FILE_EXT));
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| serialization(e.to_string()))?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| serialization(e.to_string()))?;

        debug!(name = %descriptor.name, ?path, "FsDataStore::materialize_binding: written");
        Ok(path)
    }

    async fn persist(&self, target: &str, value: ReceivedValue) -> Result<(), TransferError> {
        debug!(%target, kind = ?value.kind(), "FsDataStore::persist: called");
        match value {
            ReceivedValue::File(path) => {
                let dest = self.path_for(target);
                if path != dest {
                    tokio::fs::create_dir_all(&self.work_dir).await?;
                    tokio::fs::copy(&path, &dest).await?;
                }
            }
            ReceivedValue::Object(value) => {
                self.objects.write().await.insert(target.to_string(), value);
            }
            ReceivedValue::BindingBuffer { bytes, .. } | ReceivedValue::BindingNative { bytes, .. } => {
                self.bindings.write().await.insert(binding_key(target), bytes);
            }
            ReceivedValue::BindingFile { descriptor, path } => {
                let bytes = tokio::fs::read(&path).await?;
                debug!(name = %descriptor.name, len = bytes.len(), "FsDataStore::persist: loaded binding backing file");
                self.bindings.write().await.insert(binding_key(target), bytes);
            }
        }
        info!(%target, "Stored received value");
        Ok(())
    }

    async fn duplicate(&self, from: &str, to: &str, kind: TransferKind) -> Result<(), TransferError> {
        debug!(%from, %to, ?kind, "FsDataStore::duplicate: called");
        match kind {
            TransferKind::File => self.copy_file(from, to).await,
            TransferKind::Object => {
                let existing = self.objects.read().await.get(from).cloned();
                match existing {
                    Some(value) => {
                        self.objects.write().await.insert(to.to_string(), value);
                        Ok(())
                    }
                    None => self.copy_file(from, to).await,
                }
            }
            TransferKind::BindingRawBuffer | TransferKind::BindingNativeStream | TransferKind::BindingFileBacked => {
                let bytes = self
                    .bindings
                    .read()
                    .await
                    .get(&binding_key(from))
                    .cloned()
                    .ok_or_else(|| TransferError::Io(format!("nothing stored under {}", from)))?;
                self.bindings.write().await.insert(binding_key(to), bytes);
                Ok(())
            }
        }
    }
}

/// Names may carry path separators; flatten them into one file name
fn file_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

/// Binding table key: the descriptor name when `name` is an encoded identifier
fn binding_key(name: &str) -> String {
    BindingObjectDescriptor::decode(name)
        .map(|d| d.name)
        .unwrap_or_else(|_| name.to_string())
}
