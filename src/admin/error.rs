use std::path::{Path, PathBuf};

use crate::types::HistError;
use thiserror::Error;

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// History file not found at the specified path.
    #[error("history file not found: {0}")]
    MissingFile(PathBuf),
    /// Core history tree error.
    #[error(transparent)]
    Core(#[from] HistError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_file(path: impl AsRef<Path>) -> Self {
        AdminError::MissingFile(path.as_ref().to_path_buf())
    }
}
