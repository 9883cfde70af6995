//! State intervals: the unit of data stored in the history tree.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

use crate::primitives::bytes::{ByteReader, ByteWriter};
use crate::types::{AttributeId, HistError, Result, Timestamp};

const TAG_NULL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_LONG: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;

/// Bytes used by the fixed part of an encoded interval: start, end,
/// attribute and value tag.
pub const INTERVAL_FIXED_LEN: usize = 8 + 8 + 4 + 1;

/// Value an attribute holds for the duration of an interval.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StateValue {
    /// No value (the attribute is unset).
    Null,
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// Double-precision float.
    Double(f64),
    /// UTF-8 string of at most 65535 bytes.
    Str(String),
    /// Opaque custom payload of at most 65535 bytes.
    Bytes(Vec<u8>),
}

impl StateValue {
    fn tag(&self) -> u8 {
        match self {
            StateValue::Null => TAG_NULL,
            StateValue::Int(_) => TAG_INT,
            StateValue::Long(_) => TAG_LONG,
            StateValue::Double(_) => TAG_DOUBLE,
            StateValue::Str(_) => TAG_STR,
            StateValue::Bytes(_) => TAG_BYTES,
        }
    }

    /// Encoded size of the payload, excluding the tag byte.
    pub fn payload_len(&self) -> usize {
        match self {
            StateValue::Null => 0,
            StateValue::Int(_) => 4,
            StateValue::Long(_) | StateValue::Double(_) => 8,
            StateValue::Str(s) => 2 + s.len(),
            StateValue::Bytes(b) => 2 + b.len(),
        }
    }

    fn check_len(&self) -> Result<()> {
        let len = match self {
            StateValue::Str(s) => s.len(),
            StateValue::Bytes(b) => b.len(),
            _ => 0,
        };
        if len > u16::MAX as usize {
            return Err(HistError::Invalid("state value longer than 65535 bytes"));
        }
        Ok(())
    }

    fn encode(&self, w: &mut ByteWriter<'_>) -> Result<()> {
        w.put_u8(self.tag())?;
        match self {
            StateValue::Null => Ok(()),
            StateValue::Int(v) => w.put_i32(*v),
            StateValue::Long(v) => w.put_i64(*v),
            StateValue::Double(v) => w.put_f64(*v),
            StateValue::Str(s) => w.put_len_prefixed(s.as_bytes()),
            StateValue::Bytes(b) => w.put_len_prefixed(b),
        }
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(match r.get_u8()? {
            TAG_NULL => StateValue::Null,
            TAG_INT => StateValue::Int(r.get_i32()?),
            TAG_LONG => StateValue::Long(r.get_i64()?),
            TAG_DOUBLE => StateValue::Double(r.get_f64()?),
            TAG_STR => {
                let raw = r.get_len_prefixed()?;
                let s = std::str::from_utf8(raw)
                    .map_err(|_| HistError::Format("string state value is not UTF-8"))?;
                StateValue::Str(s.to_owned())
            }
            TAG_BYTES => StateValue::Bytes(r.get_len_prefixed()?.to_vec()),
            _ => return Err(HistError::Format("unknown state value tag")),
        })
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Null => f.write_str("null"),
            StateValue::Int(v) => write!(f, "{v}"),
            StateValue::Long(v) => write!(f, "{v}L"),
            StateValue::Double(v) => write!(f, "{v}"),
            StateValue::Str(s) => write!(f, "{s:?}"),
            StateValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

/// A closed time range `[start, end]` during which `attribute` held `value`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Interval {
    start: Timestamp,
    end: Timestamp,
    attribute: AttributeId,
    value: StateValue,
}

impl Interval {
    /// Builds an interval, rejecting `start > end` and oversized values.
    pub fn new(
        start: Timestamp,
        end: Timestamp,
        attribute: impl Into<AttributeId>,
        value: StateValue,
    ) -> Result<Self> {
        if start > end {
            return Err(HistError::Invariant("interval start is after its end"));
        }
        value.check_len()?;
        Ok(Self {
            start,
            end,
            attribute: attribute.into(),
            value,
        })
    }

    /// First timestamp covered.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Last timestamp covered (inclusive).
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Attribute this interval belongs to.
    pub fn attribute(&self) -> AttributeId {
        self.attribute
    }

    /// Value held during the interval.
    pub fn value(&self) -> &StateValue {
        &self.value
    }

    /// Returns true when `t` lies in `[start, end]`.
    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t <= self.end
    }

    /// Returns true when the interval overlaps `[start, end]`.
    pub fn intersects(&self, start: Timestamp, end: Timestamp) -> bool {
        self.start <= end && self.end >= start
    }

    /// Serialized size in a node block.
    pub fn encoded_len(&self) -> usize {
        INTERVAL_FIXED_LEN + self.value.payload_len()
    }

    /// Ordering used inside nodes: by end time, then start time.
    pub fn node_order(&self, other: &Interval) -> Ordering {
        self.end
            .cmp(&other.end)
            .then(self.start.cmp(&other.start))
    }

    pub(crate) fn encode(&self, w: &mut ByteWriter<'_>) -> Result<()> {
        w.put_i64(self.start)?;
        w.put_i64(self.end)?;
        w.put_u32(self.attribute.0)?;
        self.value.encode(w)
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let start = r.get_i64()?;
        let end = r.get_i64()?;
        let attribute = AttributeId(r.get_u32()?);
        let value = StateValue::decode(r)?;
        if start > end {
            return Err(HistError::Format("stored interval has start after end"));
        }
        Ok(Self {
            start,
            end,
            attribute,
            value,
        })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}] attr={} value={}",
            self.start, self.end, self.attribute, self.value
        )
    }
}
