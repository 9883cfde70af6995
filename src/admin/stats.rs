use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Serialize;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_history;
use crate::admin::Result;
use crate::tree::{CounterMetrics, TreeHeader};
use crate::types::SeqNum;

/// Usage statistics of a closed history file.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    /// Decoded file header.
    pub tree: TreeHeader,
    /// Node and interval totals.
    pub nodes: NodeStats,
    /// Node cache activity during the scan.
    pub cache: CacheStats,
    /// Sizes on disk.
    pub filesystem: FilesystemStats,
}

/// Node and interval totals.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeStats {
    pub leaves: u64,
    pub branches: u64,
    pub intervals: u64,
    /// Intervals stored above the leaf level.
    pub branch_intervals: u64,
    pub avg_leaf_usage_percent: f64,
    pub avg_branch_usage_percent: f64,
    /// Bytes of node blocks actually holding data.
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilesystemStats {
    pub path: String,
    pub size_bytes: u64,
    /// Header plus one block per node.
    pub expected_size_bytes: u64,
}

/// Reads every node of the file at `path` and summarizes it.
pub fn stats(path: impl AsRef<Path>, opts: &AdminOpenOptions) -> Result<StatsReport> {
    let path = path.as_ref();
    let counters = Arc::new(CounterMetrics::default());
    let mut opts = opts.clone();
    opts.metrics = Some(counters.clone());
    let tree = open_history(path, &opts)?;
    let header = tree.header();

    let mut nodes = NodeStats::default();
    let mut leaf_usage = 0.0;
    let mut branch_usage = 0.0;
    for raw in 0..header.node_count {
        let node = tree.read_node(SeqNum(raw))?;
        let held = node.intervals().len() as u64;
        nodes.intervals += held;
        nodes.used_bytes += node.used_bytes() as u64;
        if node.is_leaf() {
            nodes.leaves += 1;
            leaf_usage += node.usage_percent();
        } else {
            nodes.branches += 1;
            nodes.branch_intervals += held;
            branch_usage += node.usage_percent();
        }
    }
    if nodes.leaves > 0 {
        nodes.avg_leaf_usage_percent = leaf_usage / nodes.leaves as f64;
    }
    if nodes.branches > 0 {
        nodes.avg_branch_usage_percent = branch_usage / nodes.branches as f64;
    }

    let cache = CacheStats {
        capacity: opts.node_cache_capacity,
        hits: counters.node_cache_hits.load(Ordering::Relaxed),
        misses: counters.node_cache_misses.load(Ordering::Relaxed),
    };
    let filesystem = FilesystemStats {
        path: path.display().to_string(),
        size_bytes: fs::metadata(path)?.len(),
        expected_size_bytes: tree.file_size(),
    };

    Ok(StatsReport {
        tree: header,
        nodes,
        cache,
        filesystem,
    })
}
