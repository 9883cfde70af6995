#![forbid(unsafe_code)]
//! Identifiers, timestamps and the crate-wide error type.

use std::fmt;

use serde::Serialize;

pub mod checksum;

pub use checksum::{crc32, masked_crc32};

/// Nanosecond-resolution timestamp as recorded by the trace.
pub type Timestamp = i64;

/// Sequence number of a node inside a history file.
///
/// Sequence numbers are dense and assigned in creation order, so node `n`
/// always lives in block `n` of the file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct SeqNum(pub u32);

impl SeqNum {
    /// Marker stored in the parent field of the root node.
    pub const NONE: SeqNum = SeqNum(u32::MAX);

    /// Returns true for the "no node" marker.
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// Returns the next sequence number.
    pub fn next(self) -> SeqNum {
        SeqNum(self.0 + 1)
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("-")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Attribute an interval describes (a quark in the state system).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct AttributeId(pub u32);

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for AttributeId {
    fn from(value: u32) -> Self {
        AttributeId(value)
    }
}

impl From<AttributeId> for u32 {
    fn from(value: AttributeId) -> Self {
        value.0
    }
}

/// Errors raised by the history tree and the checkpoint index.
#[derive(thiserror::Error, Debug)]
pub enum HistError {
    /// Read or write failure on a backing file.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Magic, checksum or layout mismatch in a persisted structure.
    #[error("format: {0}")]
    Format(&'static str),
    /// The file was written by a different on-disk format revision.
    #[error("file version mismatch: expected {expected}, found {found}")]
    FileVersion {
        /// Version this build understands.
        expected: u32,
        /// Version recorded in the file.
        found: u32,
    },
    /// The file was produced by a different version of the state provider.
    #[error("provider version mismatch: expected {expected}, found {found}")]
    ProviderVersion {
        /// Version requested by the caller.
        expected: u32,
        /// Version recorded in the file.
        found: u32,
    },
    /// A call broke a structural rule (bad interval bounds, insert after close, ...).
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
    /// A caller supplied an argument outside the accepted range.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A node was requested that does not exist in the file.
    #[error("node {seq} out of range (node count {count})")]
    NodeOutOfRange {
        /// Requested sequence number.
        seq: SeqNum,
        /// Number of nodes in the tree.
        count: u32,
    },
    /// The operation observed a cancellation request.
    #[error("operation canceled")]
    Canceled,
    /// An earlier storage failure left the tree unusable.
    #[error("history tree unusable after an earlier storage failure")]
    Poisoned,
}

impl HistError {
    /// Returns true when the persisted structure must be discarded and rebuilt
    /// from the source trace.
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            HistError::Format(_)
                | HistError::FileVersion { .. }
                | HistError::ProviderVersion { .. }
                | HistError::NodeOutOfRange { .. }
                | HistError::Poisoned
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HistError>;
