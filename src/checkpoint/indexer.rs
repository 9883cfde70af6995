//! Linear trace scan that builds a [`CheckpointIndex`].

use serde::Serialize;
use tracing::{debug, info};

use super::trace::TraceReader;
use super::{CheckpointIndex, DEFAULT_CHECKPOINT_INTERVAL};
use crate::primitives::concurrency::CancelToken;
use crate::types::{Result, Timestamp};

/// Snapshot handed to the progress callback.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct IndexProgress {
    /// Events read so far.
    pub events: u64,
    /// Checkpoints recorded so far.
    pub checkpoints: usize,
    /// Timestamp of the last event read.
    pub last_timestamp: Option<Timestamp>,
}

/// Totals of a completed scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    /// Number of events in the trace.
    pub events: u64,
    /// Timestamp of the first event.
    pub start_time: Option<Timestamp>,
    /// Largest timestamp seen.
    pub end_time: Option<Timestamp>,
    /// Checkpoints recorded.
    pub checkpoints: usize,
}

type ProgressFn = Box<dyn FnMut(IndexProgress) + Send>;

/// Reads a trace from its start and records a checkpoint every
/// `interval` events.
pub struct TraceIndexer {
    interval: u64,
    cancel: CancelToken,
    progress_every: u64,
    progress: Option<ProgressFn>,
}

impl Default for TraceIndexer {
    fn default() -> Self {
        Self::new(DEFAULT_CHECKPOINT_INTERVAL)
    }
}

impl TraceIndexer {
    /// Indexer recording one checkpoint every `interval` events.
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            cancel: CancelToken::new(),
            progress_every: 0,
            progress: None,
        }
    }

    /// Aborts the scan with [`crate::HistError::Canceled`] once `token` fires.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Calls `f` every `every` events and once more at the end.
    pub fn on_progress(mut self, every: u64, f: impl FnMut(IndexProgress) + Send + 'static) -> Self {
        self.progress_every = every.max(1);
        self.progress = Some(Box::new(f));
        self
    }

    /// Scans the whole trace and returns the finished index.
    pub fn build<R: TraceReader>(
        &mut self,
        reader: &mut R,
    ) -> Result<(CheckpointIndex<R::Location>, IndexSummary)> {
        self.build_with(reader, |_, _| Ok(()))
    }

    /// Scans the whole trace, handing every event and its rank to `sink`.
    ///
    /// `sink` is where a caller feeds a state provider, typically one
    /// inserting intervals into a [`crate::HistoryTree`]. An error from the
    /// reader or the sink stops the scan.
    pub fn build_with<R, F>(
        &mut self,
        reader: &mut R,
        mut sink: F,
    ) -> Result<(CheckpointIndex<R::Location>, IndexSummary)>
    where
        R: TraceReader,
        F: FnMut(&R::Event, u64) -> Result<()>,
    {
        let mut index = CheckpointIndex::new(self.interval)?;
        let mut summary = IndexSummary::default();
        let mut ctx = reader.seek_location(None)?;
        ctx.rank = 0;
        debug!(interval = self.interval, "checkpoint.index.start");

        loop {
            self.cancel.check()?;
            let rank = ctx.rank;
            let location = index.wants_checkpoint(rank).then(|| ctx.location.clone());
            let Some(event) = reader.read_next(&mut ctx)? else {
                break;
            };
            let timestamp = R::timestamp(&event);
            if let Some(location) = location {
                index.insert(timestamp, location, rank)?;
            }
            sink(&event, rank)?;

            summary.events += 1;
            summary.start_time.get_or_insert(timestamp);
            summary.end_time = Some(summary.end_time.map_or(timestamp, |end| end.max(timestamp)));
            if self.progress_every > 0 && summary.events % self.progress_every == 0 {
                self.report(&summary, index.len(), timestamp);
            }
        }

        summary.checkpoints = index.len();
        if let Some(last) = summary.end_time {
            self.report(&summary, index.len(), last);
        }
        info!(
            events = summary.events,
            checkpoints = summary.checkpoints,
            "checkpoint.index.done"
        );
        Ok((index, summary))
    }

    fn report(&mut self, summary: &IndexSummary, checkpoints: usize, last: Timestamp) {
        if let Some(progress) = self.progress.as_mut() {
            progress(IndexProgress {
                events: summary.events,
                checkpoints,
                last_timestamp: Some(last),
            });
        }
    }
}
