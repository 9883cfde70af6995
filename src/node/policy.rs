//! Where a new branch of the tree starts when the current one fills up.

use serde::Serialize;

use crate::interval::Interval;
use crate::types::{HistError, Result, Timestamp};

/// Rule for the start time of freshly created sibling nodes.
///
/// Chosen once when the tree is created and persisted in the header.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertPolicy {
    /// New nodes start at `max(interval.start, tree_end)`. Siblings never
    /// overlap; intervals that began earlier are stored in an ancestor.
    #[default]
    Sequential,
    /// New nodes start at the start of the interval that triggered the
    /// split, but never before the sibling they follow. Siblings may
    /// overlap, so a query can descend into several children of one node.
    Overlapping,
}

impl InsertPolicy {
    /// Start time for the nodes created to hold `interval`.
    pub fn new_branch_start(self, interval: &Interval, tree_end: Timestamp) -> Timestamp {
        match self {
            InsertPolicy::Sequential => interval.start().max(tree_end),
            InsertPolicy::Overlapping => interval.start(),
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            InsertPolicy::Sequential => 0,
            InsertPolicy::Overlapping => 1,
        }
    }

    pub(crate) fn from_byte(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(InsertPolicy::Sequential),
            1 => Ok(InsertPolicy::Overlapping),
            _ => Err(HistError::Format("unknown insert policy")),
        }
    }
}
