//! Disk-backed interval history tree.
//!
//! The tree is append-only. A single writer inserts intervals, which land in
//! the open ("latest") node of some level; when that node fills up it is
//! closed, written to its block and replaced by a fresh sibling. Closed
//! nodes never change again, so readers query them through the node cache
//! while the writer keeps mutating the latest branch.
//!
//! ```text
//! header | node 0 | node 1 | ... | node N-1
//! ```

pub mod config;
pub mod header;
pub mod metrics;
pub mod query;
mod store;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::interval::Interval;
use crate::node::{InsertPolicy, Node, NodeLayout, Rejection};
use crate::primitives::concurrency::WriterLease;
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{HistError, Result, SeqNum, Timestamp};

pub use config::{
    HistoryTreeConfig, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_CHILDREN, DEFAULT_NODE_CACHE,
    IGNORE_PROVIDER_VERSION,
};
pub use header::{TreeHeader, FILE_VERSION, TREE_HEADER_SIZE, TREE_MAGIC};
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, TreeMetrics};
pub use query::RangeIter;

use store::NodeStore;

/// Where an accepted interval was stored.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InsertLocation {
    /// Position in the latest branch, 0 being the root.
    pub depth: usize,
    /// Level of the node (0 = leaf).
    pub level: u16,
    /// Sequence number of the node.
    pub seq: SeqNum,
}

struct TreeState {
    /// Open node per depth; index 0 is the root, the last entry the leaf.
    latest_branch: Vec<Arc<Node>>,
    node_count: u32,
    tree_end: Timestamp,
    closed: bool,
    poisoned: bool,
    last_insert: Option<InsertLocation>,
}

impl TreeState {
    fn ensure_writable(&self) -> Result<()> {
        if self.poisoned {
            return Err(HistError::Poisoned);
        }
        if self.closed {
            return Err(HistError::Invariant("history tree is closed"));
        }
        Ok(())
    }

    fn depth(&self) -> usize {
        self.latest_branch.len()
    }

    fn root(&self) -> &Arc<Node> {
        &self.latest_branch[0]
    }
}

/// Append-only interval store with point and range queries.
///
/// All methods take `&self`. Inserts serialize on an internal lock that is
/// held while a split writes the nodes it closes. Queries take the lock
/// only to copy the latest branch, so they wait for an in-flight insert but
/// never for each other.
pub struct HistoryTree {
    path: Option<PathBuf>,
    store: NodeStore,
    provider_version: u32,
    tree_start: Timestamp,
    policy: InsertPolicy,
    metrics: Arc<dyn TreeMetrics>,
    state: RwLock<TreeState>,
    _lease: Option<WriterLease>,
}

impl HistoryTree {
    /// Creates a new, empty tree at `path`, replacing any existing file.
    pub fn create(path: impl AsRef<Path>, config: HistoryTreeConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let lease = WriterLease::acquire(path)?;
        let io = StdFileIo::create(path)?;
        let mut tree = Self::create_with_io(Arc::new(io), config)?;
        tree.path = Some(path.to_path_buf());
        tree._lease = Some(lease);
        Ok(tree)
    }

    /// Creates a new, empty tree on top of an arbitrary block device.
    pub fn create_with_io(io: Arc<dyn FileIo>, config: HistoryTreeConfig) -> Result<Self> {
        config.validate()?;
        let layout = config.layout();
        let metrics = config.metrics.clone().unwrap_or_else(default_metrics);
        let store = NodeStore::new(io, layout, config.node_cache_capacity, metrics.clone());
        let root = Node::new_leaf(layout, SeqNum(0), SeqNum::NONE, config.tree_start);
        let tree = Self {
            path: None,
            store,
            provider_version: config.provider_version,
            tree_start: config.tree_start,
            policy: config.policy,
            metrics,
            state: RwLock::new(TreeState {
                latest_branch: vec![Arc::new(root)],
                node_count: 1,
                tree_end: config.tree_start,
                closed: false,
                poisoned: false,
                last_insert: None,
            }),
            _lease: None,
        };
        {
            let state = tree.state.read();
            tree.header_for(&state).write(tree.store.io())?;
        }
        info!(
            block_size = config.block_size,
            max_children = config.max_children,
            tree_start = config.tree_start,
            policy = ?config.policy,
            "htree.create"
        );
        Ok(tree)
    }

    /// Opens a closed history file for querying.
    ///
    /// Geometry comes from the file; `config` supplies the expected provider
    /// version (or [`IGNORE_PROVIDER_VERSION`]), the cache size and metrics.
    pub fn open(path: impl AsRef<Path>, config: HistoryTreeConfig) -> Result<Self> {
        let path = path.as_ref();
        let io = StdFileIo::open_read_only(path)?;
        let mut tree = Self::open_with_io(Arc::new(io), config)?;
        tree.path = Some(path.to_path_buf());
        Ok(tree)
    }

    /// Opens a closed history tree stored on an arbitrary block device.
    pub fn open_with_io(io: Arc<dyn FileIo>, config: HistoryTreeConfig) -> Result<Self> {
        let header = TreeHeader::read(io.as_ref())?;
        if config.provider_version != IGNORE_PROVIDER_VERSION
            && header.provider_version != config.provider_version
        {
            return Err(HistError::ProviderVersion {
                expected: config.provider_version,
                found: header.provider_version,
            });
        }
        if !header.is_complete {
            return Err(HistError::Format("history file was not closed cleanly"));
        }
        let layout = NodeLayout {
            block_size: header.block_size as usize,
            max_children: header.max_children as usize,
        };
        let geometry = HistoryTreeConfig::new(header.tree_start)
            .block_size(header.block_size)
            .max_children(header.max_children);
        if geometry.validate().is_err() {
            return Err(HistError::Format("header geometry is invalid"));
        }
        if header.node_count == 0 || header.root_seq.0 >= header.node_count {
            return Err(HistError::Format("root sequence number out of range"));
        }
        let needed = TREE_HEADER_SIZE + u64::from(header.node_count) * header.block_size as u64;
        if io.len()? < needed {
            return Err(HistError::Format("file shorter than its node count"));
        }

        let metrics = config.metrics.clone().unwrap_or_else(default_metrics);
        let cache = config.node_cache_capacity.max(1);
        let store = NodeStore::new(io, layout, cache, metrics.clone());

        let root = store.read_node(header.root_seq)?;
        if root.start() != header.tree_start {
            return Err(HistError::Format("root start does not match tree start"));
        }
        let mut latest_branch = vec![root];
        loop {
            let tail = &latest_branch[latest_branch.len() - 1];
            let Some(child) = tail.children().last() else {
                break;
            };
            if latest_branch.len() >= header.depth as usize {
                return Err(HistError::Format("tree deeper than recorded depth"));
            }
            let next = store.read_node(child.seq)?;
            latest_branch.push(next);
        }
        if latest_branch.len() != header.depth as usize {
            return Err(HistError::Format("tree depth does not match header"));
        }

        info!(
            node_count = header.node_count,
            depth = header.depth,
            tree_start = header.tree_start,
            tree_end = header.tree_end,
            "htree.open"
        );
        Ok(Self {
            path: None,
            store,
            provider_version: header.provider_version,
            tree_start: header.tree_start,
            policy: header.policy,
            metrics,
            state: RwLock::new(TreeState {
                latest_branch,
                node_count: header.node_count,
                tree_end: header.tree_end,
                closed: true,
                poisoned: false,
                last_insert: None,
            }),
            _lease: None,
        })
    }

    fn header_for(&self, state: &TreeState) -> TreeHeader {
        let layout = self.store.layout();
        TreeHeader {
            file_version: FILE_VERSION,
            provider_version: self.provider_version,
            block_size: layout.block_size as u32,
            max_children: layout.max_children as u32,
            node_count: state.node_count,
            root_seq: state.root().seq(),
            tree_start: self.tree_start,
            tree_end: state.tree_end,
            depth: state.depth() as u32,
            is_complete: state.closed,
            policy: self.policy,
        }
    }

    /// Inserts one interval and reports which node absorbed it.
    ///
    /// Intervals are expected in roughly chronological order. One that
    /// starts before the open node of a level is stored in an ancestor.
    pub fn insert(&self, interval: Interval) -> Result<InsertLocation> {
        let mut state = self.state.write();
        state.ensure_writable()?;
        if interval.start() < self.tree_start {
            return Err(HistError::Invariant("interval starts before the tree start"));
        }
        if interval.encoded_len() > self.store.layout().max_interval_len() {
            return Err(HistError::Invalid("interval does not fit in an empty node"));
        }
        let leaf_depth = state.depth() - 1;
        match self.try_insert_at(&mut state, interval, leaf_depth) {
            Ok(location) => {
                state.last_insert = Some(location);
                self.metrics.interval_inserted(location.level);
                Ok(location)
            }
            Err(err) => {
                state.poisoned = true;
                warn!(error = %err, "htree.insert.failed");
                Err(err)
            }
        }
    }

    fn try_insert_at(
        &self,
        state: &mut TreeState,
        interval: Interval,
        mut depth: usize,
    ) -> Result<InsertLocation> {
        loop {
            match state.latest_branch[depth].check_insert(&interval) {
                Some(Rejection::Full) => {
                    let start = self.policy.new_branch_start(&interval, state.tree_end);
                    self.add_sibling(state, depth, start)?;
                    depth = state.depth() - 1;
                }
                Some(Rejection::StartsBeforeNode) => {
                    if depth == 0 {
                        return Err(HistError::Invariant("interval starts before the root"));
                    }
                    depth -= 1;
                }
                Some(Rejection::Closed) => {
                    return Err(HistError::Invariant("latest branch holds a closed node"));
                }
                None => {
                    let end = interval.end();
                    let node = Arc::make_mut(&mut state.latest_branch[depth]);
                    let location = InsertLocation {
                        depth,
                        level: node.level(),
                        seq: node.seq(),
                    };
                    if !node.try_insert(interval) {
                        return Err(HistError::Invariant("node refused an admitted interval"));
                    }
                    state.tree_end = state.tree_end.max(end);
                    return Ok(location);
                }
            }
        }
    }

    fn new_node(
        &self,
        state: &mut TreeState,
        level: u16,
        parent: SeqNum,
        start: Timestamp,
    ) -> Node {
        let layout = self.store.layout();
        let seq = SeqNum(state.node_count);
        state.node_count += 1;
        if level == 0 {
            Node::new_leaf(layout, seq, parent, start)
        } else {
            Node::new_branch(layout, seq, parent, level, start)
        }
    }

    /// Closes and writes every latest node from `depth` down to the leaf.
    fn close_from(&self, state: &mut TreeState, depth: usize, end: Timestamp) -> Result<()> {
        for i in (depth..state.depth()).rev() {
            let node = Arc::make_mut(&mut state.latest_branch[i]);
            node.close(end);
            let closed_end = node.end();
            debug!(seq = node.seq().0, level = node.level(), end = closed_end, "htree.node.close");
            if i > 0 {
                Arc::make_mut(&mut state.latest_branch[i - 1]).close_last_child(closed_end);
            }
            self.store.write_node(Arc::clone(&state.latest_branch[i]))?;
        }
        Ok(())
    }

    fn add_sibling(&self, state: &mut TreeState, mut depth: usize, start: Timestamp) -> Result<()> {
        let max_children = self.store.layout().max_children;
        loop {
            if depth == 0 {
                return self.add_new_root(state, start);
            }
            if state.latest_branch[depth - 1].child_count() < max_children {
                break;
            }
            depth -= 1;
        }
        // Siblings never start before the node they replace; an earlier
        // interval is routed to an ancestor instead.
        let start = start.max(state.latest_branch[depth].start());

        let split = state.tree_end;
        self.close_from(state, depth, split)?;
        for i in depth..state.depth() {
            let level = (state.depth() - 1 - i) as u16;
            let parent_seq = state.latest_branch[i - 1].seq();
            let node = self.new_node(state, level, parent_seq, start);
            Arc::make_mut(&mut state.latest_branch[i - 1]).link_child(node.seq(), start)?;
            state.latest_branch[i] = Arc::new(node);
        }
        debug!(depth, start, node_count = state.node_count, "htree.branch.sibling");
        Ok(())
    }

    fn add_new_root(&self, state: &mut TreeState, start: Timestamp) -> Result<()> {
        let split = state.tree_end;
        let old_depth = state.depth();
        let root_level = old_depth as u16;

        let mut root = self.new_node(state, root_level, SeqNum::NONE, self.tree_start);
        Arc::make_mut(&mut state.latest_branch[0]).set_parent(root.seq());
        self.close_from(state, 0, split)?;

        let old_root = &state.latest_branch[0];
        root.link_child(old_root.seq(), old_root.start())?;
        root.close_last_child(old_root.end());

        let mut branch = Vec::with_capacity(old_depth + 1);
        branch.push(root);
        for level in (0..root_level).rev() {
            let parent = branch.len() - 1;
            let node = self.new_node(state, level, branch[parent].seq(), start);
            branch[parent].link_child(node.seq(), start)?;
            branch.push(node);
        }
        state.latest_branch = branch.into_iter().map(Arc::new).collect();
        debug!(
            depth = state.depth(),
            root = state.root().seq().0,
            "htree.root.grow"
        );
        Ok(())
    }

    /// Closes every open node at `end`, writes them and the final header.
    ///
    /// Terminal: later inserts fail.
    pub fn close_tree(&self, end: Timestamp) -> Result<()> {
        let mut state = self.state.write();
        state.ensure_writable()?;
        if end < state.tree_end {
            return Err(HistError::Invariant(
                "close time precedes intervals already inserted",
            ));
        }
        state.tree_end = end;
        let result = self.close_from(&mut state, 0, end).and_then(|()| {
            state.closed = true;
            self.header_for(&state).write(self.store.io())?;
            self.store.sync()
        });
        match result {
            Ok(()) => {
                info!(end, node_count = state.node_count, depth = state.depth(), "htree.close");
                Ok(())
            }
            Err(err) => {
                state.poisoned = true;
                warn!(error = %err, "htree.close.failed");
                Err(err)
            }
        }
    }

    /// Removes the backing file. Only trees created or opened by path.
    pub fn delete_file(self) -> Result<()> {
        let path = self
            .path
            .clone()
            .ok_or(HistError::Invalid("history tree has no backing path"))?;
        drop(self);
        std::fs::remove_file(&path)?;
        info!(path = %path.display(), "htree.delete");
        Ok(())
    }

    /// Path of the backing file, if the tree was created or opened by path.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Earliest timestamp the tree covers.
    pub fn tree_start(&self) -> Timestamp {
        self.tree_start
    }

    /// Latest timestamp seen so far (or the close time).
    pub fn tree_end(&self) -> Timestamp {
        self.state.read().tree_end
    }

    /// Number of nodes, open ones included.
    pub fn node_count(&self) -> u32 {
        self.state.read().node_count
    }

    /// Number of levels; 1 while the tree is a single leaf.
    pub fn depth(&self) -> usize {
        self.state.read().depth()
    }

    /// Sequence number of the root node.
    pub fn root_sequence(&self) -> SeqNum {
        self.state.read().root().seq()
    }

    /// Sequence numbers of the latest branch, root first.
    pub fn latest_branch(&self) -> Vec<SeqNum> {
        self.state
            .read()
            .latest_branch
            .iter()
            .map(|node| node.seq())
            .collect()
    }

    /// Where the most recent successful insert landed.
    pub fn last_insert(&self) -> Option<InsertLocation> {
        self.state.read().last_insert
    }

    /// Returns true after [`HistoryTree::close_tree`] (or when opened from disk).
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Returns true after a storage failure made the tree unusable.
    pub fn is_poisoned(&self) -> bool {
        self.state.read().poisoned
    }

    /// Size of the backing file once every node is written.
    pub fn file_size(&self) -> u64 {
        let layout = self.store.layout();
        TREE_HEADER_SIZE + u64::from(self.node_count()) * layout.block_size as u64
    }

    /// Node block size.
    pub fn block_size(&self) -> u32 {
        self.store.layout().block_size as u32
    }

    /// Branch fan-out.
    pub fn max_children(&self) -> u32 {
        self.store.layout().max_children as u32
    }

    /// Provider version recorded for this tree.
    pub fn provider_version(&self) -> u32 {
        self.provider_version
    }

    /// Start rule for new sibling nodes.
    pub fn policy(&self) -> InsertPolicy {
        self.policy
    }

    /// Header describing the current state.
    pub fn header(&self) -> TreeHeader {
        self.header_for(&self.state.read())
    }
}
