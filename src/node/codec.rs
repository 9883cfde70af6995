//! Block encoding for [`Node`].
//!
//! All integers are little-endian. The checksum covers the whole block with
//! the checksum field itself zeroed.

use std::ops::Range;

use super::{ChildRef, Node, NodeKind, NodeLayout, NodeParts};
use crate::interval::{Interval, INTERVAL_FIXED_LEN};
use crate::primitives::bytes::{ByteReader, ByteWriter};
use crate::types::{masked_crc32, HistError, Result, SeqNum};

/// Length of the header shared by both node kinds.
pub const NODE_HEADER_LEN: usize = 36;
/// Length of one entry in a branch child table.
pub const CHILD_ENTRY_LEN: usize = 4 + 8 + 8;

const KIND: usize = 0;
const START: Range<usize> = 1..9;
const END: Range<usize> = 9..17;
const SEQ: Range<usize> = 17..21;
const PARENT: Range<usize> = 21..25;
const INTERVAL_COUNT: Range<usize> = 25..29;
const LEVEL: Range<usize> = 29..31;
const FLAGS: usize = 31;
const CRC32: Range<usize> = 32..36;
const CHILD_COUNT: Range<usize> = 36..40;
const CHILD_TABLE: usize = 40;

const FLAG_CLOSED: u8 = 0b0000_0001;

/// Serializes `node` into `buf`, which must be exactly one block long.
pub fn encode(node: &Node, buf: &mut [u8]) -> Result<()> {
    let layout = node.layout();
    if buf.len() != layout.block_size {
        return Err(HistError::Invalid("node buffer does not match block size"));
    }
    buf.fill(0);
    buf[KIND] = node.kind() as u8;
    buf[START].copy_from_slice(&node.start().to_le_bytes());
    buf[END].copy_from_slice(&node.end().to_le_bytes());
    buf[SEQ].copy_from_slice(&node.seq().0.to_le_bytes());
    buf[PARENT].copy_from_slice(&node.parent().0.to_le_bytes());
    let count = u32::try_from(node.intervals().len())
        .map_err(|_| HistError::Invalid("too many intervals in node"))?;
    buf[INTERVAL_COUNT].copy_from_slice(&count.to_le_bytes());
    buf[LEVEL].copy_from_slice(&node.level().to_le_bytes());
    buf[FLAGS] = if node.is_closed() { FLAG_CLOSED } else { 0 };

    if node.kind() == NodeKind::Branch {
        let children = node.children();
        buf[CHILD_COUNT].copy_from_slice(&(children.len() as u32).to_le_bytes());
        let mut w = ByteWriter::at(buf, CHILD_TABLE);
        for child in children {
            w.put_u32(child.seq.0)?;
            w.put_i64(child.start)?;
            w.put_i64(child.end)?;
        }
    }

    let mut w = ByteWriter::at(buf, layout.header_len(node.kind()));
    for interval in node.intervals() {
        interval.encode(&mut w)?;
    }

    let crc = masked_crc32(buf, CRC32);
    buf[CRC32].copy_from_slice(&crc.to_le_bytes());
    Ok(())
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

/// Rebuilds a node from one block.
pub fn decode(buf: &[u8], layout: NodeLayout) -> Result<Node> {
    if buf.len() != layout.block_size {
        return Err(HistError::Format("node block size mismatch"));
    }
    let stored_crc = u32_at(buf, CRC32);
    if stored_crc != masked_crc32(buf, CRC32) {
        return Err(HistError::Format("node checksum mismatch"));
    }

    let kind = NodeKind::try_from(buf[KIND])?;
    let start = i64_at(buf, START);
    let end = i64_at(buf, END);
    if start > end {
        return Err(HistError::Format("node start after node end"));
    }
    let seq = SeqNum(u32_at(buf, SEQ));
    let parent = SeqNum(u32_at(buf, PARENT));
    let interval_count = u32_at(buf, INTERVAL_COUNT) as usize;
    let level = u16::from_le_bytes([buf[LEVEL.start], buf[LEVEL.start + 1]]);
    let closed = buf[FLAGS] & FLAG_CLOSED != 0;
    match (kind, level) {
        (NodeKind::Leaf, 0) => {}
        (NodeKind::Branch, l) if l > 0 => {}
        _ => return Err(HistError::Format("node level does not match its kind")),
    }

    let mut children = Vec::new();
    if kind == NodeKind::Branch {
        let child_count = u32_at(buf, CHILD_COUNT) as usize;
        if child_count > layout.max_children {
            return Err(HistError::Format("child count exceeds child table"));
        }
        let mut r = ByteReader::at(buf, CHILD_TABLE);
        children.reserve(child_count);
        for _ in 0..child_count {
            let child = ChildRef {
                seq: SeqNum(r.get_u32()?),
                start: r.get_i64()?,
                end: r.get_i64()?,
            };
            if child.start > child.end {
                return Err(HistError::Format("child start after child end"));
            }
            children.push(child);
        }
    }

    let mut r = ByteReader::at(buf, layout.header_len(kind));
    let mut intervals =
        Vec::with_capacity(interval_count.min(layout.block_size / INTERVAL_FIXED_LEN));
    for _ in 0..interval_count {
        intervals.push(Interval::decode(&mut r)?);
    }

    Ok(Node::from_parts(NodeParts {
        layout,
        kind,
        seq,
        parent,
        level,
        start,
        end,
        closed,
        intervals,
        children,
    }))
}
