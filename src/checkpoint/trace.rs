//! Trace reader abstraction consumed by the checkpoint index.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::interval::StateValue;
use crate::types::{AttributeId, Result, Timestamp};

/// Resumable read position inside a trace.
///
/// `location` identifies the next event to be read and `rank` is that
/// event's 0-based index in the trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext<L> {
    /// Opaque reader position.
    pub location: L,
    /// Rank of the event at `location`.
    pub rank: u64,
}

/// Sequential reader over a trace that can jump to saved locations.
///
/// Contexts are independent cursors: the reader resumes from whichever
/// context it is handed and never keeps its own read position.
pub trait TraceReader {
    /// Serializable position inside the trace.
    type Location: Clone + fmt::Debug;
    /// Event type produced by the reader.
    type Event;

    /// Returns a context positioned at `location`, or at the first event
    /// when `location` is `None`. The rank of the returned context is only
    /// meaningful for the trace start; callers overwrite it otherwise.
    fn seek_location(
        &mut self,
        location: Option<&Self::Location>,
    ) -> Result<TraceContext<Self::Location>>;

    /// Reads the event at `ctx` and advances `ctx` past it.
    /// Returns `None` at the end of the trace.
    fn read_next(&mut self, ctx: &mut TraceContext<Self::Location>) -> Result<Option<Self::Event>>;

    /// Timestamp of `event`.
    fn timestamp(event: &Self::Event) -> Timestamp;
}

/// Event of a [`MemoryTrace`]: an attribute taking a new value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryEvent {
    /// Time of the change.
    pub timestamp: Timestamp,
    /// Attribute that changed.
    pub attribute: u32,
    /// Integer value assigned.
    pub value: i64,
}

impl MemoryEvent {
    /// Attribute as a typed identifier.
    pub fn attribute_id(&self) -> AttributeId {
        AttributeId(self.attribute)
    }

    /// Value as a state value.
    pub fn state_value(&self) -> StateValue {
        StateValue::Long(self.value)
    }
}

/// Trace held in memory; locations are event indices.
#[derive(Clone, Debug, Default)]
pub struct MemoryTrace {
    events: Vec<MemoryEvent>,
}

impl MemoryTrace {
    /// Wraps events already ordered as they appear in the trace.
    pub fn new(events: Vec<MemoryEvent>) -> Self {
        Self { events }
    }

    /// Builds a trace with one event per timestamp, cycling over
    /// `attributes` attributes.
    pub fn from_timestamps(timestamps: impl IntoIterator<Item = Timestamp>, attributes: u32) -> Self {
        let events = timestamps
            .into_iter()
            .enumerate()
            .map(|(i, timestamp)| MemoryEvent {
                timestamp,
                attribute: i as u32 % attributes.max(1),
                value: i as i64,
            })
            .collect();
        Self { events }
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true when the trace has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events in trace order.
    pub fn events(&self) -> &[MemoryEvent] {
        &self.events
    }
}

impl TraceReader for MemoryTrace {
    type Location = usize;
    type Event = MemoryEvent;

    fn seek_location(&mut self, location: Option<&usize>) -> Result<TraceContext<usize>> {
        let location = location.copied().unwrap_or(0).min(self.events.len());
        Ok(TraceContext {
            location,
            rank: location as u64,
        })
    }

    fn read_next(&mut self, ctx: &mut TraceContext<usize>) -> Result<Option<MemoryEvent>> {
        let Some(event) = self.events.get(ctx.location) else {
            return Ok(None);
        };
        ctx.location += 1;
        ctx.rank += 1;
        Ok(Some(event.clone()))
    }

    fn timestamp(event: &MemoryEvent) -> Timestamp {
        event.timestamp
    }
}
