//! Tree configuration and presets.

use std::fmt;
use std::sync::Arc;

use super::metrics::TreeMetrics;
use crate::interval::INTERVAL_FIXED_LEN;
use crate::node::{InsertPolicy, NodeKind, NodeLayout};
use crate::types::{HistError, Result, Timestamp};

/// Default node block size (64 KiB).
pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024;
/// Default number of children per branch node.
pub const DEFAULT_MAX_CHILDREN: u32 = 50;
/// Default number of nodes kept in the node cache.
pub const DEFAULT_NODE_CACHE: usize = 256;
/// Provider version that matches any file when opening.
pub const IGNORE_PROVIDER_VERSION: u32 = u32::MAX;

/// Configuration used when creating or opening a [`super::HistoryTree`].
///
/// When opening an existing file the geometry (block size, child count,
/// tree start, policy) comes from the file header; only the provider
/// version check, the cache size and the metrics sink apply.
#[derive(Clone)]
pub struct HistoryTreeConfig {
    /// Size of one node block in bytes.
    pub block_size: u32,
    /// Maximum number of children per branch node.
    pub max_children: u32,
    /// Version of the state provider that produces the intervals.
    pub provider_version: u32,
    /// Earliest timestamp the tree accepts.
    pub tree_start: Timestamp,
    /// Start rule for new sibling nodes.
    pub policy: InsertPolicy,
    /// Capacity of the node cache, in nodes.
    pub node_cache_capacity: usize,
    /// Optional metrics collection implementation.
    pub metrics: Option<Arc<dyn TreeMetrics>>,
}

impl HistoryTreeConfig {
    /// Creates a configuration with default geometry starting at `tree_start`.
    pub fn new(tree_start: Timestamp) -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_children: DEFAULT_MAX_CHILDREN,
            provider_version: 0,
            tree_start,
            policy: InsertPolicy::Sequential,
            node_cache_capacity: DEFAULT_NODE_CACHE,
            metrics: None,
        }
    }

    /// Small blocks for traces with few attributes.
    pub fn compact(tree_start: Timestamp) -> Self {
        Self::new(tree_start).block_size(4 * 1024).max_children(16)
    }

    /// Large blocks for traces with very many concurrent attributes.
    pub fn large(tree_start: Timestamp) -> Self {
        Self::new(tree_start)
            .block_size(1024 * 1024)
            .max_children(100)
            .node_cache_capacity(64)
    }

    /// Sets the node block size.
    pub fn block_size(mut self, bytes: u32) -> Self {
        self.block_size = bytes;
        self
    }

    /// Sets the branch fan-out.
    pub fn max_children(mut self, children: u32) -> Self {
        self.max_children = children;
        self
    }

    /// Sets the provider version written to (or expected in) the header.
    pub fn provider_version(mut self, version: u32) -> Self {
        self.provider_version = version;
        self
    }

    /// Sets the insertion policy.
    pub fn policy(mut self, policy: InsertPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the node cache capacity.
    pub fn node_cache_capacity(mut self, nodes: usize) -> Self {
        self.node_cache_capacity = nodes;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn TreeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Node geometry derived from this configuration.
    pub fn layout(&self) -> NodeLayout {
        NodeLayout {
            block_size: self.block_size as usize,
            max_children: self.max_children as usize,
        }
    }

    /// Checks that the geometry can hold at least one interval per node.
    pub fn validate(&self) -> Result<()> {
        if self.max_children < 2 {
            return Err(HistError::Invalid("max_children must be at least 2"));
        }
        if self.node_cache_capacity == 0 {
            return Err(HistError::Invalid("node cache capacity must be non-zero"));
        }
        if self.provider_version == IGNORE_PROVIDER_VERSION {
            return Err(HistError::Invalid("provider version is reserved"));
        }
        let layout = self.layout();
        if layout.block_size < layout.header_len(NodeKind::Branch) + INTERVAL_FIXED_LEN {
            return Err(HistError::Invalid(
                "block size too small for the branch header and one interval",
            ));
        }
        Ok(())
    }
}

impl Default for HistoryTreeConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for HistoryTreeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryTreeConfig")
            .field("block_size", &self.block_size)
            .field("max_children", &self.max_children)
            .field("provider_version", &self.provider_version)
            .field("tree_start", &self.tree_start)
            .field("policy", &self.policy)
            .field("node_cache_capacity", &self.node_cache_capacity)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
