//! Position-tracked read cursor over borrowed bytes, plus the borrowed
//! "string" view SSH packets are full of.
//!
//! Readers never own storage: dropping one does not free the bytes it was
//! constructed over, and every view it hands out borrows from that same
//! backing slice.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::convert::TryInto;

/// A borrowed SSH "string": `u32` length followed by raw bytes, with no
/// terminator. Equality and ordering are lexicographic byte compare with
/// length as the final tiebreaker (so `"ab"` sorts before `"ab\0"`).
#[derive(Copy, Clone)]
pub struct WireStr<'a> {
    bytes: &'a [u8],
}

impl<'a> WireStr<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Lossy UTF-8 decode, for fields the protocol defines as strings of
    /// text (channel type names, request names, TERM).
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.bytes).into_owned()
    }
}

impl<'a> std::fmt::Debug for WireStr<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WireStr({:?})", self.to_string_lossy())
    }
}

impl<'a> PartialEq for WireStr<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}
impl<'a> Eq for WireStr<'a> {}

impl<'a> PartialOrd for WireStr<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> Ord for WireStr<'a> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes
            .cmp(other.bytes)
            .then_with(|| self.bytes.len().cmp(&other.bytes.len()))
    }
}

/// A checked, position-tracked cursor over a borrowed byte slice.
///
/// Invariant: `0 <= position <= len`. Every read verifies
/// `position + need <= len` without risk of integer wraparound before
/// advancing.
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Checked `position + need <= len`, refusing to wrap around.
    fn check(&self, need: usize) -> Result<()> {
        let end = self
            .position
            .checked_add(need)
            .ok_or_else(|| Error::wire("read position overflowed"))?;
        if end > self.bytes.len() {
            return Err(Error::wire(format!(
                "read of {need} bytes at position {} exceeds buffer length {}",
                self.position,
                self.bytes.len()
            )));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.check(1)?;
        let v = self.bytes[self.position];
        self.position += 1;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.check(4)?;
        let v = u32::from_be_bytes(
            self.bytes[self.position..self.position + 4]
                .try_into()
                .expect("checked length is exactly 4"),
        );
        self.position += 4;
        Ok(v)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a `u32` length followed by that many bytes, returning a
    /// borrowed view into the reader's own backing store.
    pub fn read_string(&mut self) -> Result<WireStr<'a>> {
        let len = self.read_u32()? as usize;
        self.check(len)?;
        let view = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(WireStr::new(view))
    }

    /// Return a borrowed view up to (not including) the first occurrence
    /// of `sentinel`, advancing past the sentinel. If `sentinel` does not
    /// appear, returns the remainder and advances to the end; this is not
    /// an error.
    pub fn read_until(&mut self, sentinel: u8) -> WireStr<'a> {
        let rest = &self.bytes[self.position..];
        match rest.iter().position(|&b| b == sentinel) {
            Some(idx) => {
                let view = &rest[..idx];
                self.position += idx + 1;
                WireStr::new(view)
            }
            None => {
                self.position = self.bytes.len();
                WireStr::new(rest)
            }
        }
    }

    pub fn read_skip(&mut self, n: usize) -> Result<()> {
        self.check(n)?;
        self.position += n;
        Ok(())
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.bytes.len() {
            return Err(Error::wire(format!(
                "seek({pos}) exceeds buffer length {}",
                self.bytes.len()
            )));
        }
        self.position = pos;
        Ok(())
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }
}
