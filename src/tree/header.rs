//! Fixed header region at the start of every history file.

use std::fmt;
use std::ops::Range;

use serde::Serialize;

use crate::node::InsertPolicy;
use crate::primitives::io::FileIo;
use crate::types::{masked_crc32, HistError, Result, SeqNum, Timestamp};

/// Marker identifying a history file.
pub const TREE_MAGIC: u32 = 0x05FF_A900;
/// On-disk format revision written by this build.
pub const FILE_VERSION: u32 = 1;
/// Bytes reserved for the header; node 0 starts right after.
pub const TREE_HEADER_SIZE: u64 = 4096;

const MAGIC: Range<usize> = 0..4;
const VERSION: Range<usize> = 4..8;
const PROVIDER_VERSION: Range<usize> = 8..12;
const BLOCK_SIZE: Range<usize> = 12..16;
const MAX_CHILDREN: Range<usize> = 16..20;
const NODE_COUNT: Range<usize> = 20..24;
const ROOT_SEQ: Range<usize> = 24..28;
const TREE_START: Range<usize> = 28..36;
const TREE_END: Range<usize> = 36..44;
const DEPTH: Range<usize> = 44..48;
const COMPLETE: usize = 48;
const POLICY: usize = 49;
const CRC32: Range<usize> = 50..54;
const USED_LEN: usize = 54;

/// Decoded contents of the header region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TreeHeader {
    /// Format revision.
    pub file_version: u32,
    /// Version of the state provider that produced the file.
    pub provider_version: u32,
    /// Node block size.
    pub block_size: u32,
    /// Branch fan-out.
    pub max_children: u32,
    /// Number of node blocks.
    pub node_count: u32,
    /// Sequence number of the root node.
    pub root_seq: SeqNum,
    /// Earliest timestamp covered.
    pub tree_start: Timestamp,
    /// Latest timestamp covered.
    pub tree_end: Timestamp,
    /// Number of levels (1 = a single leaf).
    pub depth: u32,
    /// True once the tree was closed and fully flushed.
    pub is_complete: bool,
    /// Start rule for new sibling nodes.
    pub policy: InsertPolicy,
}

fn u32_at(buf: &[u8], range: Range<usize>) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[range]);
    u32::from_le_bytes(raw)
}

fn i64_at(buf: &[u8], range: Range<usize>) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[range]);
    i64::from_le_bytes(raw)
}

impl TreeHeader {
    /// Serializes the header into a full header region.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; TREE_HEADER_SIZE as usize];
        buf[MAGIC].copy_from_slice(&TREE_MAGIC.to_le_bytes());
        buf[VERSION].copy_from_slice(&self.file_version.to_le_bytes());
        buf[PROVIDER_VERSION].copy_from_slice(&self.provider_version.to_le_bytes());
        buf[BLOCK_SIZE].copy_from_slice(&self.block_size.to_le_bytes());
        buf[MAX_CHILDREN].copy_from_slice(&self.max_children.to_le_bytes());
        buf[NODE_COUNT].copy_from_slice(&self.node_count.to_le_bytes());
        buf[ROOT_SEQ].copy_from_slice(&self.root_seq.0.to_le_bytes());
        buf[TREE_START].copy_from_slice(&self.tree_start.to_le_bytes());
        buf[TREE_END].copy_from_slice(&self.tree_end.to_le_bytes());
        buf[DEPTH].copy_from_slice(&self.depth.to_le_bytes());
        buf[COMPLETE] = u8::from(self.is_complete);
        buf[POLICY] = self.policy.to_byte();
        let crc = masked_crc32(&buf[..USED_LEN], CRC32);
        buf[CRC32].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parses a header region, checking magic, format version and checksum.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < USED_LEN {
            return Err(HistError::Format("history header truncated"));
        }
        if u32_at(buf, MAGIC) != TREE_MAGIC {
            return Err(HistError::Format("not a history tree file (bad magic)"));
        }
        let file_version = u32_at(buf, VERSION);
        if file_version != FILE_VERSION {
            return Err(HistError::FileVersion {
                expected: FILE_VERSION,
                found: file_version,
            });
        }
        if u32_at(buf, CRC32) != masked_crc32(&buf[..USED_LEN], CRC32) {
            return Err(HistError::Format("history header checksum mismatch"));
        }
        let is_complete = match buf[COMPLETE] {
            0 => false,
            1 => true,
            _ => return Err(HistError::Format("invalid completion flag")),
        };
        Ok(Self {
            file_version,
            provider_version: u32_at(buf, PROVIDER_VERSION),
            block_size: u32_at(buf, BLOCK_SIZE),
            max_children: u32_at(buf, MAX_CHILDREN),
            node_count: u32_at(buf, NODE_COUNT),
            root_seq: SeqNum(u32_at(buf, ROOT_SEQ)),
            tree_start: i64_at(buf, TREE_START),
            tree_end: i64_at(buf, TREE_END),
            depth: u32_at(buf, DEPTH),
            is_complete,
            policy: InsertPolicy::from_byte(buf[POLICY])?,
        })
    }

    /// Reads and parses the header region from `io`.
    pub fn read(io: &dyn FileIo) -> Result<Self> {
        if io.len()? < TREE_HEADER_SIZE {
            return Err(HistError::Format("file shorter than the history header"));
        }
        let mut buf = vec![0u8; USED_LEN];
        io.read_at(0, &mut buf)?;
        Self::decode(&buf)
    }

    /// Writes the header region to `io`.
    pub fn write(&self, io: &dyn FileIo) -> Result<()> {
        io.write_at(0, &self.encode())
    }
}

impl fmt::Display for TreeHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "file_version: {}", self.file_version)?;
        writeln!(f, "provider_version: {}", self.provider_version)?;
        writeln!(f, "block_size: {}", self.block_size)?;
        writeln!(f, "max_children: {}", self.max_children)?;
        writeln!(f, "node_count: {}", self.node_count)?;
        writeln!(f, "root_seq: {}", self.root_seq)?;
        writeln!(f, "tree_start: {}", self.tree_start)?;
        writeln!(f, "tree_end: {}", self.tree_end)?;
        writeln!(f, "depth: {}", self.depth)?;
        writeln!(f, "policy: {:?}", self.policy)?;
        write!(f, "is_complete: {}", self.is_complete)
    }
}
