#![forbid(unsafe_code)]
//! CRC32 helpers for headers and node blocks.

use std::ops::Range;

/// CRC32 of a byte slice.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// CRC32 of `block` computed as if the bytes in `field` were zero.
///
/// Blocks store their own checksum inside `field`, so the stored value never
/// feeds into itself.
pub fn masked_crc32(block: &[u8], field: Range<usize>) -> u32 {
    debug_assert!(field.len() <= 8, "checksum field wider than 8 bytes");
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&block[..field.start]);
    hasher.update(&[0u8; 8][..field.len()]);
    hasher.update(&block[field.end..]);
    hasher.finalize()
}
