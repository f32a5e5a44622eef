//! Value kinds and wire transfer kinds

use serde::{Deserialize, Serialize};

use crate::binding::{BindingObjectDescriptor, TransferPath};
use crate::error::TransferError;

/// How a value is represented at rest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    #[default]
    File,
    Object,
    Binding,
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Object => write!(f, "object"),
            Self::Binding => write!(f, "binding"),
        }
    }
}

impl std::str::FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "object" => Ok(Self::Object),
            "binding" => Ok(Self::Binding),
            _ => Err(format!("Unknown data kind: {}", s)),
        }
    }
}

/// How a value crosses the wire
///
/// Both ends derive this from the same inputs (kind, source identifier,
/// persistent mode), so every send and receive operation matches on it
/// exhaustively instead of inspecting payloads at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferKind {
    File,
    Object,
    BindingRawBuffer,
    BindingNativeStream,
    BindingFileBacked,
}

impl TransferKind {
    /// Derive the wire kind for a value
    ///
    /// Binding sources must carry a decodable identifier.
    pub fn resolve(kind: DataKind, source_id: &str, persistent_mode: bool) -> Result<Self, TransferError> {
        match kind {
            DataKind::File => Ok(Self::File),
            DataKind::Object => Ok(Self::Object),
            DataKind::Binding => {
                let descriptor = BindingObjectDescriptor::decode(source_id)?;
                Ok(Self::from(descriptor.transfer_path(persistent_mode)))
            }
        }
    }
}

impl From<TransferPath> for TransferKind {
    fn from(path: TransferPath) -> Self {
        match path {
            TransferPath::RawBuffer => Self::BindingRawBuffer,
            TransferPath::NativeStream => Self::BindingNativeStream,
            TransferPath::FileBacked => Self::BindingFileBacked,
        }
    }
}
