//! A chunked async byte source over the session transport (§4.3 "Read
//! context").
//!
//! `crate::read::ReadCursor` operates over an already-materialized slice —
//! the shape a promise/iterator payload or a compression-table entry
//! arrives in, since each of those is one self-contained mux frame. The
//! root value and inline schema bytes have no such frame around them; they
//! have to be read directly off the transport as the session starts, one
//! byte (or one known-length run of bytes) at a time, which is exactly
//! what this type is for. A one-byte pushback slot backs `peek_byte`,
//! needed by `crate::reflect`'s naked-nullable lookahead.
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{bail, Result};

pub struct AsyncByteSource<R> {
    inner: R,
    pushback: Option<u8>,
}

impl<R: AsyncRead + Unpin> AsyncByteSource<R> {
    pub fn new(inner: R) -> Self {
        AsyncByteSource { inner, pushback: None }
    }

    pub async fn read_byte(&mut self) -> Result<u8> {
        if let Some(b) = self.pushback.take() {
            return Ok(b);
        }
        let mut buf = [0u8; 1];
        let n = self.inner.read(&mut buf).await?;
        if n == 0 {
            bail!(OutOfData, "transport ended, expected at least one more byte");
        }
        Ok(buf[0])
    }

    /// Reads the next byte without consuming it. Used by `reflect_async` to
    /// decide whether a `nullable` is naked (next byte `0x00`) or carries a
    /// child schema (§4.6).
    pub async fn peek_byte(&mut self) -> Result<u8> {
        if let Some(b) = self.pushback {
            return Ok(b);
        }
        let b = self.read_byte().await?;
        self.pushback = Some(b);
        Ok(b)
    }

    pub async fn read_n(&mut self, n: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        if n > 0 {
            if let Some(b) = self.pushback.take() {
                buf[0] = b;
                filled = 1;
            }
        }
        while filled < n {
            let read = self.inner.read(&mut buf[filled..]).await?;
            if read == 0 {
                bail!(OutOfData, "transport ended, expected {n} bytes, got {filled}");
            }
            filled += read;
        }
        Ok(Bytes::from(buf))
    }

    pub async fn read_uint(&mut self) -> Result<u64> {
        let lead = self.read_byte().await?;
        Ok(match lead {
            0xFD => u16::from_le_bytes(self.read_n(2).await?.as_ref().try_into().unwrap()) as u64,
            0xFE => u32::from_le_bytes(self.read_n(4).await?.as_ref().try_into().unwrap()) as u64,
            0xFF => u64::from_le_bytes(self.read_n(8).await?.as_ref().try_into().unwrap()),
            b => b as u64,
        })
    }

    pub async fn read_sint(&mut self) -> Result<i64> {
        Ok(crate::varint::zigzag_decode(self.read_uint().await?))
    }

    pub async fn read_channel_id(&mut self) -> Result<u16> {
        let b = self.read_n(2).await?;
        Ok(u16::from_be_bytes(b.as_ref().try_into().unwrap()))
    }

    /// Hands the transport back. Called once the root value (and any inline
    /// schema ahead of it) has been fully read, so the dispatcher loop can
    /// take exclusive ownership for the rest of the session (§4.3).
    pub fn into_inner(self) -> R {
        self.inner
    }
}
