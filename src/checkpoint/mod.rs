//! Sparse checkpoint index mapping timestamps and ranks to trace locations.
//!
//! While a trace is scanned linearly, one checkpoint is recorded every
//! `interval` events. Seeking resolves to the nearest checkpoint at or
//! before the target and leaves the final forward scan to the trace reader
//! (see [`seek`]).

pub mod indexer;
pub mod persist;
pub mod seek;
pub mod trace;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{HistError, Result, Timestamp};

pub use indexer::{IndexProgress, IndexSummary, TraceIndexer};
pub use seek::{seek_event_by_rank, seek_event_by_timestamp};
pub use trace::{MemoryEvent, MemoryTrace, TraceContext, TraceReader};

/// Default number of events between two checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 1000;

/// One index entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint<L> {
    /// Timestamp of the event at `location`.
    pub timestamp: Timestamp,
    /// Reader position of that event.
    pub location: L,
    /// Rank of that event in the trace.
    pub rank: u64,
}

/// Where a seek should resume reading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeekPosition<L> {
    /// Index of the checkpoint used, `None` for an empty index.
    pub checkpoint: Option<usize>,
    /// Location to resume from, `None` meaning the trace start.
    pub location: Option<L>,
    /// Rank of the event at `location`.
    pub rank: u64,
}

impl<L> SeekPosition<L> {
    fn trace_start() -> Self {
        Self {
            checkpoint: None,
            location: None,
            rank: 0,
        }
    }
}

/// Append-only list of checkpoints sorted by rank.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckpointIndex<L> {
    interval: u64,
    entries: Vec<Checkpoint<L>>,
}

impl<L: Clone> CheckpointIndex<L> {
    /// Creates an empty index expecting one checkpoint every `interval` events.
    pub fn new(interval: u64) -> Result<Self> {
        if interval == 0 {
            return Err(HistError::Invalid("checkpoint interval must be non-zero"));
        }
        Ok(Self {
            interval,
            entries: Vec::new(),
        })
    }

    pub(crate) fn from_entries(interval: u64, entries: Vec<Checkpoint<L>>) -> Result<Self> {
        let mut index = Self::new(interval)?;
        for entry in entries {
            if !index.insert(entry.timestamp, entry.location, entry.rank)? {
                return Err(HistError::Format("duplicate checkpoint rank"));
            }
        }
        Ok(index)
    }

    /// Events between two checkpoints.
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Number of checkpoints.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no checkpoint was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checkpoint at position `idx`.
    pub fn get(&self, idx: usize) -> Option<&Checkpoint<L>> {
        self.entries.get(idx)
    }

    /// All checkpoints in insertion order.
    pub fn entries(&self) -> &[Checkpoint<L>] {
        &self.entries
    }

    /// Appends a checkpoint.
    ///
    /// Ranks must not go backwards; re-recording the last rank is ignored
    /// and reported as `Ok(false)`. A timestamp going backwards is accepted
    /// but logged, since searches assume sorted timestamps.
    pub fn insert(&mut self, timestamp: Timestamp, location: L, rank: u64) -> Result<bool> {
        if let Some(last) = self.entries.last() {
            if rank < last.rank {
                return Err(HistError::Invariant("checkpoint rank went backwards"));
            }
            if rank == last.rank {
                return Ok(false);
            }
            if timestamp < last.timestamp {
                warn!(
                    rank,
                    timestamp,
                    previous = last.timestamp,
                    "checkpoint.timestamp.backwards"
                );
            }
        }
        self.entries.push(Checkpoint {
            timestamp,
            location,
            rank,
        });
        Ok(true)
    }

    /// Returns true when the event of `rank` is the next one to checkpoint.
    pub fn wants_checkpoint(&self, rank: u64) -> bool {
        rank % self.interval == 0 && self.entries.len() as u64 == rank / self.interval
    }

    /// Records a checkpoint for the event of `rank` if it falls on the
    /// checkpoint grid and was not recorded yet.
    pub fn update(&mut self, timestamp: Timestamp, location: &L, rank: u64) -> Result<bool> {
        if !self.wants_checkpoint(rank) {
            return Ok(false);
        }
        self.insert(timestamp, location.clone(), rank)
    }

    /// Searches the checkpoint timestamps for `timestamp`.
    ///
    /// Returns the index of the first checkpoint with exactly that
    /// timestamp, or `-(insertion_point + 1)` when there is none.
    pub fn binary_search(&self, timestamp: Timestamp) -> isize {
        let idx = self
            .entries
            .partition_point(|entry| entry.timestamp < timestamp);
        match self.entries.get(idx) {
            Some(entry) if entry.timestamp == timestamp => idx as isize,
            _ => -(idx as isize + 1),
        }
    }

    /// Index of the checkpoint to start from when looking for `timestamp`.
    ///
    /// On an exact hit the previous checkpoint is used, so that events
    /// sharing the timestamp but preceding the matching checkpoint are not
    /// skipped.
    pub fn checkpoint_before(&self, timestamp: Timestamp) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let found = self.binary_search(timestamp);
        let idx = if found < 0 {
            (-(found + 2)).max(0)
        } else {
            (found - 1).max(0)
        };
        Some((idx as usize).min(self.entries.len() - 1))
    }

    /// Nearest position at or before `timestamp`.
    pub fn seek_timestamp(&self, timestamp: Timestamp) -> SeekPosition<L> {
        match self.checkpoint_before(timestamp) {
            Some(idx) => self.position(idx),
            None => SeekPosition::trace_start(),
        }
    }

    /// Nearest position at or before the event of `rank`; ranks beyond the
    /// last checkpoint clamp to it.
    pub fn seek_rank(&self, rank: u64) -> SeekPosition<L> {
        if self.entries.is_empty() {
            return SeekPosition::trace_start();
        }
        let idx = self
            .entries
            .partition_point(|entry| entry.rank <= rank)
            .saturating_sub(1);
        self.position(idx)
    }

    fn position(&self, idx: usize) -> SeekPosition<L> {
        let entry = &self.entries[idx];
        SeekPosition {
            checkpoint: Some(idx),
            location: Some(entry.location.clone()),
            rank: entry.rank,
        }
    }
}
