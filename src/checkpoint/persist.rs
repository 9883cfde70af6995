//! Checkpoint index files.
//!
//! A fixed 32-byte header followed by a JSON body holding the checkpoint
//! list. The header carries the checkpoint interval, the entry count and a
//! CRC-32 of the body. Files are written to a sibling temporary path and
//! renamed into place.

use std::fs;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::{Checkpoint, CheckpointIndex};
use crate::primitives::bytes::{ByteReader, ByteWriter};
use crate::types::{crc32, HistError, Result};

/// Magic bytes opening every checkpoint file.
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"HTCI";
/// Current checkpoint file version.
pub const CHECKPOINT_VERSION: u32 = 1;
/// Size of the fixed header.
pub const CHECKPOINT_HEADER_LEN: usize = 32;

const MAGIC: Range<usize> = 0..4;
const VERSION: usize = 4;
const INTERVAL: usize = 8;
const COUNT: usize = 16;
const BODY_LEN: usize = 24;
const BODY_CRC: usize = 28;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

impl<L: Clone + Serialize> CheckpointIndex<L> {
    /// Writes the index to `path`, replacing any previous file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let body = serde_json::to_vec(self.entries())
            .map_err(|_| HistError::Invalid("checkpoint locations are not serializable"))?;
        let body_len = u32::try_from(body.len())
            .map_err(|_| HistError::Invalid("checkpoint index too large"))?;

        let mut header = [0u8; CHECKPOINT_HEADER_LEN];
        header[MAGIC].copy_from_slice(&CHECKPOINT_MAGIC);
        let mut w = ByteWriter::at(&mut header, VERSION);
        w.put_u32(CHECKPOINT_VERSION)?;
        w.put_i64(self.interval() as i64)?;
        w.put_i64(self.len() as i64)?;
        w.put_u32(body_len)?;
        w.put_u32(crc32(&body))?;

        let tmp = temp_path(path);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&header)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        info!(path = %path.display(), checkpoints = self.len(), "checkpoint.save");
        Ok(())
    }
}

impl<L: Clone + DeserializeOwned> CheckpointIndex<L> {
    /// Reads an index written by [`CheckpointIndex::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        if bytes.len() < CHECKPOINT_HEADER_LEN {
            return Err(HistError::Format("checkpoint file truncated"));
        }
        if bytes[MAGIC] != CHECKPOINT_MAGIC {
            return Err(HistError::Format("bad checkpoint magic"));
        }
        let header = &bytes[..CHECKPOINT_HEADER_LEN];
        let version = ByteReader::at(header, VERSION).get_u32()?;
        if version != CHECKPOINT_VERSION {
            return Err(HistError::FileVersion {
                expected: CHECKPOINT_VERSION,
                found: version,
            });
        }
        let interval = ByteReader::at(header, INTERVAL).get_i64()? as u64;
        let count = ByteReader::at(header, COUNT).get_i64()? as u64;
        let body_len = ByteReader::at(header, BODY_LEN).get_u32()? as usize;
        let body_crc = ByteReader::at(header, BODY_CRC).get_u32()?;

        let body = &bytes[CHECKPOINT_HEADER_LEN..];
        if body.len() != body_len {
            return Err(HistError::Format("checkpoint body length mismatch"));
        }
        if crc32(body) != body_crc {
            return Err(HistError::Format("checkpoint body checksum mismatch"));
        }
        let entries: Vec<Checkpoint<L>> = serde_json::from_slice(body)
            .map_err(|_| HistError::Format("checkpoint body is not valid"))?;
        if entries.len() as u64 != count {
            return Err(HistError::Format("checkpoint count mismatch"));
        }
        let index = Self::from_entries(interval, entries).map_err(|err| match err {
            HistError::Format(msg) => HistError::Format(msg),
            _ => HistError::Format("checkpoint entries are not valid"),
        })?;
        debug!(path = %path.display(), checkpoints = index.len(), "checkpoint.load");
        Ok(index)
    }
}
