#![forbid(unsafe_code)]

//! History file administration utilities.
//!
//! Read-only inspection of closed history files: structural verification
//! and usage statistics. Both open the file through [`open_history`], which
//! reports a missing file distinctly from a corrupt one.

mod error;
mod options;
mod stats;
mod util;
mod verify;

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Options for opening a history file in admin mode.
pub use options::AdminOpenOptions;

/// Usage statistics of a closed history file.
pub use stats::{stats, CacheStats, FilesystemStats, NodeStats, StatsReport};

/// Structural verification of a closed history file.
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity};

/// Opens a history file for administrative reads.
pub use util::open_history;
