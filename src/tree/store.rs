use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use super::header::TREE_HEADER_SIZE;
use super::metrics::TreeMetrics;
use crate::node::{codec, Node, NodeLayout};
use crate::primitives::io::FileIo;
use crate::types::{HistError, Result, SeqNum};

/// Node blocks on disk plus a bounded cache of decoded nodes.
pub(crate) struct NodeStore {
    io: Arc<dyn FileIo>,
    layout: NodeLayout,
    cache: Mutex<LruCache<SeqNum, Arc<Node>>>,
    metrics: Arc<dyn TreeMetrics>,
}

impl NodeStore {
    pub(crate) fn new(
        io: Arc<dyn FileIo>,
        layout: NodeLayout,
        capacity: usize,
        metrics: Arc<dyn TreeMetrics>,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            io,
            layout,
            cache: Mutex::new(LruCache::new(capacity)),
            metrics,
        }
    }

    pub(crate) fn io(&self) -> &dyn FileIo {
        self.io.as_ref()
    }

    pub(crate) fn layout(&self) -> NodeLayout {
        self.layout
    }

    fn offset(&self, seq: SeqNum) -> u64 {
        TREE_HEADER_SIZE + u64::from(seq.0) * self.layout.block_size as u64
    }

    /// Writes a closed node and keeps it cached.
    pub(crate) fn write_node(&self, node: Arc<Node>) -> Result<()> {
        let mut block = vec![0u8; self.layout.block_size];
        codec::encode(&node, &mut block)?;
        self.io.write_at(self.offset(node.seq()), &block)?;
        self.metrics.node_written();
        trace!(seq = node.seq().0, "store.node.write");
        self.cache.lock().put(node.seq(), node);
        Ok(())
    }

    /// Returns the node with sequence number `seq`, reading it if needed.
    pub(crate) fn read_node(&self, seq: SeqNum) -> Result<Arc<Node>> {
        if let Some(node) = self.cache.lock().get(&seq).cloned() {
            self.metrics.node_read(true);
            return Ok(node);
        }
        let mut block = vec![0u8; self.layout.block_size];
        self.io.read_at(self.offset(seq), &mut block)?;
        let node = codec::decode(&block, self.layout)?;
        if node.seq() != seq {
            return Err(HistError::Format(
                "node block holds a different sequence number",
            ));
        }
        self.metrics.node_read(false);
        trace!(seq = seq.0, "store.node.read");
        let node = Arc::new(node);
        self.cache.lock().put(seq, Arc::clone(&node));
        Ok(node)
    }

    pub(crate) fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }
}
