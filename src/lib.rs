//! Append-only interval history storage.
//!
//! A [`HistoryTree`] stores time intervals in fixed-size node blocks of a
//! single file and answers "what was valid at time t" in logarithmic time.
//! A [`CheckpointIndex`] maps timestamps and event ranks to saved trace
//! locations so that a trace reader can seek without a full rescan.

#![warn(missing_docs)]

pub mod admin;
pub mod checkpoint;
pub mod interval;
pub mod node;
pub mod primitives;
pub mod tree;
pub mod types;

pub use checkpoint::{
    Checkpoint, CheckpointIndex, SeekPosition, TraceContext, TraceIndexer, TraceReader,
};
pub use interval::{Interval, StateValue};
pub use node::InsertPolicy;
pub use primitives::concurrency::CancelToken;
pub use tree::{HistoryTree, HistoryTreeConfig, InsertLocation};
pub use types::{AttributeId, HistError, Result, SeqNum, Timestamp};
