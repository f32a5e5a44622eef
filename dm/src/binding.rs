//! Binding object identifiers
//!
//! A binding object lives in an external native runtime. Its identity travels
//! as a single string `name#type#elementCount`, which both ends of a transfer
//! must parse and produce identically. The decoded descriptor decides how the
//! value moves:
//!
//! - `elementCount > 0`: raw byte buffer of known size, in any mode
//! - otherwise, persistent mode: native stream, no file ever written
//! - otherwise: materialize to a file and move it as an ordinary file

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// Separator between the fields of an encoded identifier
pub const DELIMITER: char = '#';

/// Decoded form of a binding object identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingObjectDescriptor {
    pub name: String,
    #[serde(rename = "backing-type")]
    pub backing_type: i32,
    #[serde(rename = "element-count")]
    pub element_count: i64,
}

/// How a binding object crosses the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferPath {
    RawBuffer,
    NativeStream,
    FileBacked,
}

impl BindingObjectDescriptor {
    pub fn new(name: impl Into<String>, backing_type: i32, element_count: i64) -> Self {
        Self {
            name: name.into(),
            backing_type,
            element_count,
        }
    }

    /// Decode `name#type#elementCount`
    ///
    /// The name is everything before the last two delimiters, so names may
    /// themselves contain `#`.
    pub fn decode(identifier: &str) -> Result<Self, TransferError> {
        let malformed = |reason: &str| TransferError::MalformedIdentifier {
            identifier: identifier.to_string(),
            reason: reason.to_string(),
        };

        let mut fields = identifier.rsplitn(3, DELIMITER);
        let count = fields.next();
        let backing_type = fields.next();
        let name = fields.next();

        let (Some(name), Some(backing_type), Some(count)) = (name, backing_type, count) else {
            return Err(malformed("missing delimiter"));
        };

        let backing_type = backing_type
            .parse::<i32>()
            .map_err(|_| malformed("backing type is not an integer"))?;
        let element_count = count
            .parse::<i64>()
            .map_err(|_| malformed("element count is not an integer"))?;

        Ok(Self {
            name: name.to_string(),
            backing_type,
            element_count,
        })
    }

    /// Encode back to the wire identifier
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.name, DELIMITER, self.backing_type, DELIMITER, self.element_count
        )
    }

    /// Pick the transfer path for this object
    pub fn transfer_path(&self, persistent_mode: bool) -> TransferPath {
        choose_transfer_path(self, persistent_mode)
    }
}

/// Pick the transfer path for a binding object
pub fn choose_transfer_path(descriptor: &BindingObjectDescriptor, persistent_mode: bool) -> TransferPath {
    if descriptor.element_count > 0 {
        TransferPath::RawBuffer
    } else if persistent_mode {
        TransferPath::NativeStream
    } else {
        TransferPath::FileBacked
    }
}

impl fmt::Display for BindingObjectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for BindingObjectDescriptor {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
