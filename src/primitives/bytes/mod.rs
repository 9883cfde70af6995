#![forbid(unsafe_code)]
//! Little-endian cursors over fixed-size blocks.
//!
//! Writers fail with [`HistError::Invalid`] when the block is too small (an
//! encoder bug or an oversized value); readers fail with
//! [`HistError::Format`] when a block ends early (a corrupt file).

use crate::types::{HistError, Result};

/// Sequential little-endian writer over a borrowed buffer.
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    /// Starts writing at `pos`.
    pub fn at(buf: &'a mut [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    /// Current write offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Result<&mut [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(HistError::Invalid("encoded value overflows block"))?;
        let dst = &mut self.buf[self.pos..end];
        self.pos = end;
        Ok(dst)
    }

    /// Writes one byte.
    pub fn put_u8(&mut self, v: u8) -> Result<()> {
        self.take(1)?[0] = v;
        Ok(())
    }

    /// Writes a `u16`.
    pub fn put_u16(&mut self, v: u16) -> Result<()> {
        self.take(2)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Writes a `u32`.
    pub fn put_u32(&mut self, v: u32) -> Result<()> {
        self.take(4)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Writes an `i32`.
    pub fn put_i32(&mut self, v: i32) -> Result<()> {
        self.take(4)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Writes an `i64`.
    pub fn put_i64(&mut self, v: i64) -> Result<()> {
        self.take(8)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Writes an `f64` by bit pattern.
    pub fn put_f64(&mut self, v: f64) -> Result<()> {
        self.take(8)?.copy_from_slice(&v.to_bits().to_le_bytes());
        Ok(())
    }

    /// Writes a `u16` length prefix followed by the bytes.
    pub fn put_len_prefixed(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u16::try_from(bytes.len())
            .map_err(|_| HistError::Invalid("payload longer than 65535 bytes"))?;
        self.put_u16(len)?;
        self.take(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }
}

/// Sequential little-endian reader over a borrowed buffer.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Starts reading at `pos`.
    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(HistError::Format("block truncated"))?;
        let src = &self.buf[self.pos..end];
        self.pos = end;
        Ok(src)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads one byte.
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a `u16`.
    pub fn get_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    /// Reads a `u32`.
    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// Reads an `i32`.
    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    /// Reads an `i64`.
    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    /// Reads an `f64` by bit pattern.
    pub fn get_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(u64::from_le_bytes(self.array()?)))
    }

    /// Reads a `u16` length prefix and the bytes it announces.
    pub fn get_len_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.get_u16()? as usize;
        self.take(len)
    }
}
