//! Point and range queries.
//!
//! Every query starts from a snapshot of the latest branch taken under the
//! read lock. Open nodes are served from that snapshot; closed nodes come
//! from the node cache or the backing file. A node is visited only when its
//! range overlaps the query, and every interval of a visited node that
//! overlaps the query is reported.

use std::collections::BTreeMap;
use std::sync::Arc;

use smallvec::SmallVec;

use super::HistoryTree;
use crate::interval::Interval;
use crate::node::Node;
use crate::primitives::concurrency::CancelToken;
use crate::types::{AttributeId, HistError, Result, SeqNum, Timestamp};

/// Frozen view of the latest branch.
pub(crate) struct Snapshot {
    branch: Vec<Arc<Node>>,
    node_count: u32,
}

impl Snapshot {
    fn root(&self) -> &Arc<Node> {
        &self.branch[0]
    }

    fn resolve(&self, tree: &HistoryTree, seq: SeqNum) -> Result<Arc<Node>> {
        if seq.0 >= self.node_count {
            return Err(HistError::NodeOutOfRange {
                seq,
                count: self.node_count,
            });
        }
        if let Some(node) = self.branch.iter().find(|node| node.seq() == seq) {
            return Ok(Arc::clone(node));
        }
        tree.store.read_node(seq)
    }
}

impl HistoryTree {
    pub(crate) fn snapshot(&self) -> Result<Snapshot> {
        let state = self.state.read();
        if state.poisoned {
            return Err(HistError::Poisoned);
        }
        Ok(Snapshot {
            branch: state.latest_branch.clone(),
            node_count: state.node_count,
        })
    }

    /// Returns the node with sequence number `seq`, open nodes included.
    pub fn read_node(&self, seq: SeqNum) -> Result<Arc<Node>> {
        self.snapshot()?.resolve(self, seq)
    }

    /// Every interval containing `t`.
    ///
    /// An empty tree, or a time outside the tree, yields an empty result.
    pub fn query(&self, t: Timestamp) -> Result<Vec<Interval>> {
        self.query_range(t, t)?.collect()
    }

    /// The interval of `attribute` containing `t`, if any.
    pub fn query_attribute(
        &self,
        t: Timestamp,
        attribute: impl Into<AttributeId>,
    ) -> Result<Option<Interval>> {
        let attribute = attribute.into();
        for item in self.query_range(t, t)? {
            let interval = item?;
            if interval.attribute() == attribute {
                return Ok(Some(interval));
            }
        }
        Ok(None)
    }

    /// Full state at `t`: one interval per attribute that has one.
    pub fn query_state(&self, t: Timestamp) -> Result<BTreeMap<AttributeId, Interval>> {
        let mut state = BTreeMap::new();
        for item in self.query_range(t, t)? {
            let interval = item?;
            state.entry(interval.attribute()).or_insert(interval);
        }
        Ok(state)
    }

    /// Lazily yields every interval overlapping `[start, end]`.
    ///
    /// The iterator works on a snapshot, so re-issuing the same query
    /// returns the same intervals for every already-closed part of the tree.
    pub fn query_range(&self, start: Timestamp, end: Timestamp) -> Result<RangeIter<'_>> {
        if start > end {
            return Err(HistError::Invalid("range start is after range end"));
        }
        let snapshot = self.snapshot()?;
        self.metrics.query_run();
        let mut pending = SmallVec::new();
        let root = snapshot.root();
        if root.start() <= end && root.effective_end() >= start {
            pending.push(root.seq());
        }
        Ok(RangeIter {
            tree: self,
            snapshot,
            start,
            end,
            pending,
            current: None,
            cancel: None,
            finished: false,
        })
    }

    /// Collects a range query, giving up with [`HistError::Canceled`] as
    /// soon as `cancel` fires. No partial result is returned.
    pub fn collect_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        cancel: &CancelToken,
    ) -> Result<Vec<Interval>> {
        self.query_range(start, end)?
            .with_cancel(cancel.clone())
            .collect()
    }
}

/// Lazy iterator over the intervals overlapping a time range.
///
/// Yields `Err` once and then stops if a node cannot be read or the
/// attached [`CancelToken`] fires between two node visits.
pub struct RangeIter<'a> {
    tree: &'a HistoryTree,
    snapshot: Snapshot,
    start: Timestamp,
    end: Timestamp,
    pending: SmallVec<[SeqNum; 16]>,
    current: Option<(Arc<Node>, usize)>,
    cancel: Option<CancelToken>,
    finished: bool,
}

impl RangeIter<'_> {
    /// Checks `cancel` before every node visit.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn fail(&mut self, err: HistError) -> Option<Result<Interval>> {
        self.finished = true;
        self.current = None;
        self.pending.clear();
        Some(Err(err))
    }

    fn next_in_current(&mut self) -> Option<Interval> {
        let (node, pos) = self.current.as_mut()?;
        let intervals = node.intervals();
        while *pos < intervals.len() {
            let candidate = &intervals[*pos];
            *pos += 1;
            if candidate.intersects(self.start, self.end) {
                return Some(candidate.clone());
            }
        }
        self.current = None;
        None
    }
}

impl Iterator for RangeIter<'_> {
    type Item = Result<Interval>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(interval) = self.next_in_current() {
                return Some(Ok(interval));
            }
            let Some(seq) = self.pending.pop() else {
                self.finished = true;
                return None;
            };
            if let Some(cancel) = &self.cancel {
                if cancel.is_canceled() {
                    return self.fail(HistError::Canceled);
                }
            }
            let node = match self.snapshot.resolve(self.tree, seq) {
                Ok(node) => node,
                Err(err) => return self.fail(err),
            };
            // Reverse so that children are visited in creation order.
            let before = self.pending.len();
            self.pending.extend(
                node.children_overlapping(self.start, self.end)
                    .map(|child| child.seq),
            );
            self.pending[before..].reverse();
            let first = node
                .intervals()
                .partition_point(|iv| iv.end() < self.start);
            self.current = Some((node, first));
        }
    }
}
