//! Transfer requests

use serde::{Deserialize, Serialize};

use super::kind::DataKind;

/// A node that may hold a copy of a value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataLocation {
    pub node: String,
}

impl DataLocation {
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }
}

impl std::fmt::Display for DataLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.node)
    }
}

/// A value identifier plus the ordered candidate locations to fetch it from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub locations: Vec<DataLocation>,
}

impl DataSource {
    pub fn new(id: impl Into<String>, locations: Vec<DataLocation>) -> Self {
        Self {
            id: id.into(),
            locations,
        }
    }

    /// A source with a single candidate location
    pub fn at(id: impl Into<String>, node: impl Into<String>) -> Self {
        Self::new(id, vec![DataLocation::new(node)])
    }
}

/// One consumer's need for a value under a local target name
///
/// Immutable once created; the registry owns it until delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source: DataSource,
    pub target: String,
    pub kind: DataKind,
}

impl TransferRequest {
    pub fn new(source: DataSource, target: impl Into<String>, kind: DataKind) -> Self {
        Self {
            source,
            target: target.into(),
            kind,
        }
    }

    pub fn file(source: DataSource, target: impl Into<String>) -> Self {
        Self::new(source, target, DataKind::File)
    }

    pub fn object(source: DataSource, target: impl Into<String>) -> Self {
        Self::new(source, target, DataKind::Object)
    }

    pub fn binding(source: DataSource, target: impl Into<String>) -> Self {
        Self::new(source, target, DataKind::Binding)
    }

    pub fn source_id(&self) -> &str {
        &self.source.id
    }
}
