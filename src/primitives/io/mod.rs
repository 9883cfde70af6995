#![forbid(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use tracing::trace;

use crate::types::{HistError, Result};

/// Positioned reads and writes on the file backing a history tree.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`, extending the file when needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Synchronizes all file data and metadata to disk.
    fn sync_all(&self) -> Result<()>;
    /// Returns the current length of the file in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, off: u64, dst: &mut [u8]) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, dst, off)
}

#[cfg(unix)]
fn write_all_at(file: &File, off: u64, src: &[u8]) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, src, off)
}

// Windows has no exact variants; loop until the slice is consumed.
#[cfg(windows)]
fn read_exact_at(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !dst.is_empty() {
        match file.seek_read(dst, off)? {
            0 => return Err(io::ErrorKind::UnexpectedEof.into()),
            n => {
                dst = &mut std::mem::take(&mut dst)[n..];
                off += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !src.is_empty() {
        match file.seek_write(src, off)? {
            0 => return Err(io::ErrorKind::WriteZero.into()),
            n => {
                src = &src[n..];
                off += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn read_exact_at(_file: &File, _off: u64, _dst: &mut [u8]) -> io::Result<()> {
    Err(io::ErrorKind::Unsupported.into())
}

#[cfg(not(any(unix, windows)))]
fn write_all_at(_file: &File, _off: u64, _src: &[u8]) -> io::Result<()> {
    Err(io::ErrorKind::Unsupported.into())
}

/// File-backed [`FileIo`]; clones share one handle.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an existing File handle.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Creates (or truncates) a file for read-write access.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::new(file))
    }

    /// Opens an existing file read-only.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Self::new(file))
    }

    fn file(&self) -> &File {
        &self.inner
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        trace!(off, len = dst.len(), "io.read_at");
        read_exact_at(self.file(), off, dst).map_err(HistError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        trace!(off, len = src.len(), "io.write_at");
        write_all_at(self.file(), off, src).map_err(HistError::from)
    }

    fn sync_all(&self) -> Result<()> {
        self.file().sync_all().map_err(HistError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata()?.len())
    }
}

/// Wrapper that fails reads or writes on demand.
///
/// Used to exercise how the tree reacts to a dying disk.
pub struct FaultyIo<I> {
    inner: I,
    writes_left: AtomicU64,
    fail_reads: AtomicBool,
}

impl<I: FileIo> FaultyIo<I> {
    /// Wraps `inner` without any armed fault.
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            writes_left: AtomicU64::new(u64::MAX),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Lets `count` more writes through, then fails every write.
    pub fn fail_writes_after(&self, count: u64) {
        self.writes_left.store(count, Ordering::SeqCst);
    }

    /// Makes every subsequent read fail (or succeed again).
    pub fn fail_reads(&self, enabled: bool) {
        self.fail_reads.store(enabled, Ordering::SeqCst);
    }
}

impl<I: FileIo> FileIo for FaultyIo<I> {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected read failure").into());
        }
        self.inner.read_at(off, dst)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let allowed = self
            .writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(io::Error::other("injected write failure").into());
        }
        self.inner.write_at(off, src)
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all()
    }

    fn len(&self) -> Result<u64> {
        self.inner.len()
    }
}
