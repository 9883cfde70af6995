//! Fixed-size tree nodes.
//!
//! A node owns a time range `[start, end]`, the intervals stored in it and,
//! for branch nodes, a bounded table of child descriptors. Every node
//! serializes to exactly one block of the history file.

pub mod codec;
pub mod policy;

use std::cmp::Ordering;

use serde::Serialize;

use crate::interval::Interval;
use crate::types::{HistError, Result, SeqNum, Timestamp};

pub use codec::{CHILD_ENTRY_LEN, NODE_HEADER_LEN};
pub use policy::InsertPolicy;

/// End time recorded for a child that is still open.
pub const OPEN_END: Timestamp = Timestamp::MAX;

/// Node flavour.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Interior node with children.
    Branch = 1,
    /// Bottom node without children.
    Leaf = 2,
}

impl TryFrom<u8> for NodeKind {
    type Error = HistError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(NodeKind::Branch),
            2 => Ok(NodeKind::Leaf),
            _ => Err(HistError::Format("unknown node kind")),
        }
    }
}

/// Block geometry shared by every node of a tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NodeLayout {
    /// Size of one node block in bytes.
    pub block_size: usize,
    /// Width of the child table in branch nodes.
    pub max_children: usize,
}

impl NodeLayout {
    /// Bytes taken by the header of a node of `kind`.
    pub fn header_len(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Leaf => NODE_HEADER_LEN,
            NodeKind::Branch => NODE_HEADER_LEN + 4 + self.max_children * CHILD_ENTRY_LEN,
        }
    }

    /// Largest interval an empty node of either kind can hold.
    pub fn max_interval_len(&self) -> usize {
        self.block_size
            .saturating_sub(self.header_len(NodeKind::Branch))
    }
}

/// Descriptor of a child inside a branch node.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ChildRef {
    /// Child sequence number.
    pub seq: SeqNum,
    /// Child start time.
    pub start: Timestamp,
    /// Child end time, [`OPEN_END`] while the child is still open.
    pub end: Timestamp,
}

impl ChildRef {
    /// Returns true when the child's range overlaps `[start, end]`.
    pub fn intersects(&self, start: Timestamp, end: Timestamp) -> bool {
        self.start <= end && self.end >= start
    }
}

/// Reason a node turned an interval away.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Rejection {
    /// The node was already closed and written.
    Closed,
    /// The interval does not fit in the remaining space.
    Full,
    /// The interval starts before the node does.
    StartsBeforeNode,
}

/// In-memory image of one node block.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    layout: NodeLayout,
    kind: NodeKind,
    seq: SeqNum,
    parent: SeqNum,
    level: u16,
    start: Timestamp,
    end: Timestamp,
    closed: bool,
    intervals: Vec<Interval>,
    children: Vec<ChildRef>,
    used: usize,
}

impl Node {
    /// Creates an empty open leaf.
    pub fn new_leaf(layout: NodeLayout, seq: SeqNum, parent: SeqNum, start: Timestamp) -> Self {
        Self::empty(layout, NodeKind::Leaf, seq, parent, 0, start)
    }

    /// Creates an empty open branch at `level` (at least 1).
    pub fn new_branch(
        layout: NodeLayout,
        seq: SeqNum,
        parent: SeqNum,
        level: u16,
        start: Timestamp,
    ) -> Self {
        debug_assert!(level > 0, "branch nodes live above the leaves");
        Self::empty(layout, NodeKind::Branch, seq, parent, level, start)
    }

    fn empty(
        layout: NodeLayout,
        kind: NodeKind,
        seq: SeqNum,
        parent: SeqNum,
        level: u16,
        start: Timestamp,
    ) -> Self {
        Self {
            layout,
            kind,
            seq,
            parent,
            level,
            start,
            end: start,
            closed: false,
            intervals: Vec::new(),
            children: Vec::new(),
            used: layout.header_len(kind),
        }
    }

    /// Node flavour.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Returns true for leaves.
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Sequence number of this node.
    pub fn seq(&self) -> SeqNum {
        self.seq
    }

    /// Sequence number of the parent, [`SeqNum::NONE`] for the root.
    pub fn parent(&self) -> SeqNum {
        self.parent
    }

    /// Height above the leaves (0 for leaves).
    pub fn level(&self) -> u16 {
        self.level
    }

    /// Start of the node's time range.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// End of the node's time range so far.
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// End used to prune queries: unbounded while the node is open.
    pub fn effective_end(&self) -> Timestamp {
        if self.closed {
            self.end
        } else {
            OPEN_END
        }
    }

    /// Returns true once the node was closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stored intervals, sorted by end then start.
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Child descriptors in creation order.
    pub fn children(&self) -> &[ChildRef] {
        &self.children
    }

    /// Number of children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Block geometry.
    pub fn layout(&self) -> NodeLayout {
        self.layout
    }

    /// Serialized bytes in use, header included.
    pub fn used_bytes(&self) -> usize {
        self.used
    }

    /// Bytes remaining before the node must close.
    pub fn free_space(&self) -> usize {
        self.layout.block_size.saturating_sub(self.used)
    }

    /// Share of the block holding data, in percent.
    pub fn usage_percent(&self) -> f64 {
        let header = self.layout.header_len(self.kind);
        let payload = self.layout.block_size.saturating_sub(header);
        if payload == 0 {
            return 100.0;
        }
        (self.used - header) as f64 * 100.0 / payload as f64
    }

    /// Explains why `interval` cannot be stored here, or `None` if it can.
    pub fn check_insert(&self, interval: &Interval) -> Option<Rejection> {
        if self.closed {
            Some(Rejection::Closed)
        } else if interval.encoded_len() > self.free_space() {
            Some(Rejection::Full)
        } else if interval.start() < self.start {
            Some(Rejection::StartsBeforeNode)
        } else {
            None
        }
    }

    /// Stores `interval` if the node can take it.
    ///
    /// On success the node end is raised to cover the interval.
    pub fn try_insert(&mut self, interval: Interval) -> bool {
        if self.check_insert(&interval).is_some() {
            return false;
        }
        self.used += interval.encoded_len();
        self.end = self.end.max(interval.end());
        let idx = self
            .intervals
            .partition_point(|held| held.node_order(&interval) != Ordering::Greater);
        self.intervals.insert(idx, interval);
        true
    }

    /// Intervals overlapping `[start, end]`.
    pub fn intervals_overlapping(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> impl Iterator<Item = &Interval> + '_ {
        let first = self.intervals.partition_point(|iv| iv.end() < start);
        self.intervals[first..]
            .iter()
            .filter(move |iv| iv.start() <= end)
    }

    /// Children whose range overlaps `[start, end]`.
    pub fn children_overlapping(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> impl Iterator<Item = &ChildRef> + '_ {
        self.children
            .iter()
            .filter(move |child| child.intersects(start, end))
    }

    pub(crate) fn set_parent(&mut self, parent: SeqNum) {
        self.parent = parent;
    }

    /// Appends an open child descriptor.
    pub(crate) fn link_child(&mut self, seq: SeqNum, start: Timestamp) -> Result<()> {
        if self.kind != NodeKind::Branch {
            return Err(HistError::Invariant("leaf nodes cannot own children"));
        }
        if self.closed {
            return Err(HistError::Invariant("cannot link a child into a closed node"));
        }
        if self.children.len() >= self.layout.max_children {
            return Err(HistError::Invariant("branch node has no free child slot"));
        }
        if start < self.start {
            return Err(HistError::Invariant("child starts before its parent"));
        }
        self.children.push(ChildRef {
            seq,
            start,
            end: OPEN_END,
        });
        Ok(())
    }

    /// Records the final end time of the most recent child.
    pub(crate) fn close_last_child(&mut self, end: Timestamp) {
        if let Some(last) = self.children.last_mut() {
            last.end = end.max(last.start);
        }
    }

    /// Freezes the node end; the node never changes afterwards.
    pub(crate) fn close(&mut self, end: Timestamp) {
        self.end = self.end.max(end);
        self.closed = true;
    }

    pub(crate) fn from_parts(parts: NodeParts) -> Self {
        let used = parts.layout.header_len(parts.kind)
            + parts
                .intervals
                .iter()
                .map(Interval::encoded_len)
                .sum::<usize>();
        Self {
            layout: parts.layout,
            kind: parts.kind,
            seq: parts.seq,
            parent: parts.parent,
            level: parts.level,
            start: parts.start,
            end: parts.end,
            closed: parts.closed,
            intervals: parts.intervals,
            children: parts.children,
            used,
        }
    }
}

/// Decoded fields used to rebuild a [`Node`].
pub(crate) struct NodeParts {
    pub layout: NodeLayout,
    pub kind: NodeKind,
    pub seq: SeqNum,
    pub parent: SeqNum,
    pub level: u16,
    pub start: Timestamp,
    pub end: Timestamp,
    pub closed: bool,
    pub intervals: Vec<Interval>,
    pub children: Vec<ChildRef>,
}
