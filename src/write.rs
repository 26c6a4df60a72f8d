//! The exact-size output buffer used during the emit phase (§4.2).
//!
//! `plan::plan_value` computes the byte size up front; `WriteCursor`
//! allocates exactly that many bytes once and panics (an internal-error
//! bug, never a caller-triggerable one) if a write closure tries to write
//! past the reserved size — the two-phase model exists precisely so this
//! never happens in practice.

use bytes::{BufMut, BytesMut};

pub struct WriteCursor {
    buf: BytesMut,
}

impl WriteCursor {
    pub fn with_capacity(size: usize) -> Self {
        WriteCursor { buf: BytesMut::with_capacity(size) }
    }

    pub fn put_u8(&mut self, b: u8) {
        self.buf.put_u8(b);
    }

    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn put_u64_le(&mut self, v: u64) {
        self.buf.put_slice(&v.to_le_bytes());
    }

    pub fn put_f64_le(&mut self, v: f64) {
        self.buf.put_slice(&v.to_le_bytes());
    }

    pub fn put_uint(&mut self, v: u64) {
        let mut tmp = [0u8; 9];
        let mut cursor = std::io::Cursor::new(&mut tmp[..]);
        crate::varint::write_uint(&mut cursor, v).expect("writing to a fixed in-memory buffer is infallible");
        let len = cursor.position() as usize;
        self.buf.put_slice(&tmp[..len]);
    }

    pub fn put_sint(&mut self, v: i64) {
        self.put_uint(crate::varint::zigzag_encode(v));
    }

    /// Writes a sub-stream channel id (§4.4 promise/iterator/readable-stream
    /// payload: "2 bytes containing a sub-stream ID"). Big-endian, matching
    /// the routing-frame channel field (§6) so the id has one consistent
    /// wire representation everywhere it appears.
    pub fn put_channel_id(&mut self, id: u16) {
        self.buf.put_slice(&id.to_be_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> bytes::Bytes {
        self.buf.freeze()
    }

    /// Freezes the buffer after checking it holds exactly `expected` bytes.
    /// A mismatch means the planner's size computation and the emit
    /// closures disagreed — an `Internal` bug in this crate, never
    /// something caller data can trigger (§4.2, §7).
    pub fn finish(self, expected: usize) -> crate::error::Result<bytes::Bytes> {
        if self.buf.len() != expected {
            crate::error::bail!(
                Internal,
                "write size mismatch: planned {expected} bytes, emitted {}",
                self.buf.len()
            );
        }
        Ok(self.buf.freeze())
    }
}
