#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;

use crate::types::{HistError, Result};

/// Cooperative cancellation flag shared between a job and the code it drives.
///
/// Cloning yields a handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not canceled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns true once [`CancelToken::cancel`] was called on any clone.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Fails with [`HistError::Canceled`] when cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(HistError::Canceled)
        } else {
            Ok(())
        }
    }
}

fn writers() -> &'static Mutex<HashSet<PathBuf>> {
    static WRITERS: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    WRITERS.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive right to write one history file inside this process.
///
/// Released on drop.
#[derive(Debug)]
pub struct WriterLease {
    path: PathBuf,
}

impl WriterLease {
    /// Claims `path` for writing. The path must already exist.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().canonicalize()?;
        let mut held = writers().lock();
        if !held.insert(path.clone()) {
            return Err(HistError::Invalid("history file already open for writing"));
        }
        debug!(path = %path.display(), "lease.acquire");
        Ok(Self { path })
    }

    /// Canonical path covered by this lease.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        writers().lock().remove(&self.path);
        debug!(path = %self.path.display(), "lease.release");
    }
}
