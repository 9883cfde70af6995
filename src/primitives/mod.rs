//! Low-level primitives the history tree is built on.
//!
//! Includes byte cursors for the on-disk codecs, positioned file I/O and
//! the small concurrency helpers shared by writers and long-running readers.

/// Little-endian byte cursors.
///
/// Bounds-checked readers and writers used by the header and node codecs.
pub mod bytes;

/// Concurrency primitives.
///
/// Cancellation tokens and the single-writer lease registry.
pub mod concurrency;

/// I/O abstractions and utilities.
///
/// Interfaces for positioned reads and writes on the backing file.
pub mod io;
