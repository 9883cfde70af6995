use std::sync::Arc;

use crate::tree::{TreeMetrics, DEFAULT_NODE_CACHE, IGNORE_PROVIDER_VERSION};

/// Common options used when opening a history file for administrative commands.
#[derive(Clone)]
pub struct AdminOpenOptions {
    /// Provider version the file must carry, or [`IGNORE_PROVIDER_VERSION`].
    pub provider_version: u32,
    /// Decoded nodes kept in memory while scanning.
    pub node_cache_capacity: usize,
    /// Receives node read events; stats attaches its own counters.
    pub metrics: Option<Arc<dyn TreeMetrics>>,
}

impl Default for AdminOpenOptions {
    fn default() -> Self {
        Self {
            provider_version: IGNORE_PROVIDER_VERSION,
            node_cache_capacity: DEFAULT_NODE_CACHE,
            metrics: None,
        }
    }
}

impl std::fmt::Debug for AdminOpenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminOpenOptions")
            .field("provider_version", &self.provider_version)
            .field("node_cache_capacity", &self.node_cache_capacity)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
