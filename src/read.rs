//! The slice-based cursor used when decoding a root value's bytes (§4.2).
//!
//! The root value always arrives as one length-prefixed blob (see
//! `crate::session`), so decoding reads from an in-memory slice rather than
//! pulling directly off the transport — the same reasoning the multiplexer
//! frame header parsing in `crate::stream::mux` uses for schema-bytes and
//! compression-table indices.

use crate::error::{bail, Result};

pub struct ReadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ReadCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ReadCursor { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The unconsumed tail of the buffer, without advancing the cursor.
    /// Used by `any` decoding (§4.4), which has to reflect a schema from
    /// the bytes ahead before it knows how many of them the schema itself
    /// consumed.
    pub fn remaining_slice(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Advances the cursor by `n` bytes already accounted for by the
    /// caller (e.g. bytes consumed by [`crate::reflect::reflect_bytes`]
    /// against [`Self::remaining_slice`]).
    pub fn advance(&mut self, n: usize) -> Result<()> {
        if self.remaining() < n {
            bail!(Internal, "advance past end of buffer: {n} > {}", self.remaining());
        }
        self.pos += n;
        Ok(())
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            bail!(OutOfData, "expected {n} more bytes, have {}", self.remaining());
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn take_u64_le(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn take_f64_le(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn take_uint(&mut self) -> Result<u64> {
        let (v, rest) = crate::varint::read_uint_slice(&self.buf[self.pos..])?;
        self.pos = self.buf.len() - rest.len();
        Ok(v)
    }

    pub fn take_sint(&mut self) -> Result<i64> {
        Ok(crate::varint::zigzag_decode(self.take_uint()?))
    }

    /// Reads a sub-stream channel id written by [`crate::write::WriteCursor::put_channel_id`].
    pub fn take_channel_id(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes(b.try_into().unwrap()))
    }
}
