use std::path::Path;

use crate::admin::error::{AdminError, Result};
use crate::admin::options::AdminOpenOptions;
use crate::tree::{HistoryTree, HistoryTreeConfig};

/// Opens a closed history file for querying.
///
/// # Errors
///
/// Returns [`AdminError::MissingFile`] if nothing exists at `path`, or the
/// core error if the file cannot be opened as a history tree.
pub fn open_history(path: &Path, opts: &AdminOpenOptions) -> Result<HistoryTree> {
    if !path.exists() {
        return Err(AdminError::missing_file(path));
    }
    let mut config = HistoryTreeConfig::default()
        .provider_version(opts.provider_version)
        .node_cache_capacity(opts.node_cache_capacity);
    if let Some(metrics) = &opts.metrics {
        config = config.metrics(metrics.clone());
    }
    Ok(HistoryTree::open(path, config)?)
}
