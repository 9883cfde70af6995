//! Seeking a trace through its checkpoint index.
//!
//! The index gives the nearest checkpoint at or before the target; the
//! remaining distance is covered by reading events forward.

use tracing::trace;

use super::trace::{TraceContext, TraceReader};
use super::{CheckpointIndex, SeekPosition};
use crate::types::{Result, Timestamp};

fn resume<R: TraceReader>(
    reader: &mut R,
    pos: SeekPosition<R::Location>,
) -> Result<TraceContext<R::Location>> {
    let mut ctx = reader.seek_location(pos.location.as_ref())?;
    ctx.rank = pos.rank;
    Ok(ctx)
}

/// Context of the first event with a timestamp at or after `timestamp`.
///
/// When every event is earlier, the returned context sits at the end of
/// the trace and reading from it yields nothing.
pub fn seek_event_by_timestamp<R: TraceReader>(
    reader: &mut R,
    index: &CheckpointIndex<R::Location>,
    timestamp: Timestamp,
) -> Result<TraceContext<R::Location>> {
    let pos = index.seek_timestamp(timestamp);
    trace!(timestamp, checkpoint = ?pos.checkpoint, "checkpoint.seek.timestamp");
    let mut ctx = resume(reader, pos)?;
    loop {
        let here = ctx.clone();
        match reader.read_next(&mut ctx)? {
            Some(event) if R::timestamp(&event) >= timestamp => return Ok(here),
            Some(_) => {}
            None => return Ok(ctx),
        }
    }
}

/// Context of the event with rank `rank`, or the end of the trace when
/// the trace is shorter.
pub fn seek_event_by_rank<R: TraceReader>(
    reader: &mut R,
    index: &CheckpointIndex<R::Location>,
    rank: u64,
) -> Result<TraceContext<R::Location>> {
    let pos = index.seek_rank(rank);
    trace!(rank, checkpoint = ?pos.checkpoint, "checkpoint.seek.rank");
    let mut ctx = resume(reader, pos)?;
    while ctx.rank < rank {
        let here = ctx.clone();
        if reader.read_next(&mut ctx)?.is_none() {
            return Ok(here);
        }
    }
    Ok(ctx)
}
