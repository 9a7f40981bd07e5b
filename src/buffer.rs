//! Growable, append-only byte buffer used to build outbound wire data.
//!
//! Mirrors the SSH "string" and big-endian integer encodings: a `u32`
//! length prefix followed by raw bytes for anything variable-length.

use crate::error::{Error, Result};
use std::convert::TryInto;

/// Allocations grow in multiples of this many bytes so that repeated small
/// writes don't reallocate on every call.
const GROWTH_QUANTUM: usize = 256;

/// A growable, append-only byte buffer that owns its storage.
///
/// Invariant: `len <= self.bytes.capacity()`. All capacity growth is
/// overflow-checked; a write that would overflow leaves the buffer
/// unchanged rather than partially mutated.
#[derive(Debug, Default, Clone)]
pub struct ByteBuffer {
    bytes: Vec<u8>,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(cap),
        }
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Ensure there is room for at least `additional` more bytes without a
    /// further reallocation, growing by a rounded quantum.
    pub fn ensure_size(&mut self, additional: usize) -> Result<()> {
        if self.bytes.capacity() - self.bytes.len() >= additional {
            return Ok(());
        }
        self.grow(additional)
    }

    /// Grow capacity to hold at least `additional` more bytes, rounding the
    /// allocation up to a multiple of [`GROWTH_QUANTUM`].
    pub fn grow(&mut self, additional: usize) -> Result<()> {
        let needed = self
            .bytes
            .len()
            .checked_add(additional)
            .ok_or_else(|| Error::BufferOverflow("capacity addition overflowed".into()))?;
        let rounded = needed
            .checked_add(GROWTH_QUANTUM - 1)
            .ok_or_else(|| Error::BufferOverflow("rounded capacity overflowed".into()))?
            / GROWTH_QUANTUM
            * GROWTH_QUANTUM;
        let extra = rounded.saturating_sub(self.bytes.len());
        if extra > 0 {
            self.bytes
                .try_reserve(extra)
                .map_err(|e| Error::OutOfMemory(e.to_string()))?;
        }
        Ok(())
    }

    /// Append a single byte without any length prefix.
    pub fn append_u8(&mut self, v: u8) -> Result<()> {
        self.ensure_size(1)?;
        self.bytes.push(v);
        Ok(())
    }

    /// Append a big-endian `u32` without any length prefix.
    pub fn append_u32(&mut self, v: u32) -> Result<()> {
        self.ensure_size(4)?;
        self.bytes.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    /// Append raw bytes without any length prefix.
    pub fn append_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_size(data.len())?;
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    /// Write a single byte. Identical to [`Self::append_u8`]; kept as a
    /// distinct name to mirror the read side (`read_u8`/`write_u8`).
    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.append_u8(v)
    }

    /// Write a big-endian `u32`.
    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.append_u32(v)
    }

    /// Write a boolean as a single byte: `0` for false, `1` for true.
    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.append_u8(if v { 1 } else { 0 })
    }

    /// Write the SSH "string" encoding: a `u32` big-endian length followed
    /// by `bytes`.
    pub fn write_data(&mut self, bytes: &[u8]) -> Result<()> {
        let len: u32 = bytes
            .len()
            .try_into()
            .map_err(|_| Error::BufferOverflow("string too long to encode".into()))?;
        self.write_u32(len)?;
        self.append_bytes(bytes)
    }

    /// Write a C-string as an SSH string: length is `s.len()`, no
    /// terminator is sent.
    pub fn write_cstring(&mut self, s: &str) -> Result<()> {
        self.write_data(s.as_bytes())
    }

    /// Remove `len` bytes starting at `offset`, shifting the tail left.
    /// Bytes outside `[offset, offset+len)` are preserved in relative order.
    pub fn remove_data(&mut self, offset: usize, len: usize) -> Result<()> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| Error::BufferOverflow("remove_data range overflowed".into()))?;
        if end > self.bytes.len() {
            return Err(Error::BufferOverflow(format!(
                "remove_data({offset}, {len}) out of range for buffer of length {}",
                self.bytes.len()
            )));
        }
        self.bytes.drain(offset..end);
        Ok(())
    }

    /// Consume the buffer, returning the owned bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}
