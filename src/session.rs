//! Top-level session encode/decode (§4.8): the header byte, the root value,
//! and — once the root has been fully written or read — the background loop
//! that drives the multiplexer to quiescence.
//!
//! Grounded the same way `crate::stream` is: `summitd`'s session/dispatch
//! modules for "one task owns the transport and loops until told to stop",
//! `bgql_runtime`'s `BinaryProtocol` for the header-then-body shape of a
//! framed session.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::asyncio::AsyncByteSource;
use crate::decode::{decode_value_async, DecodeCtx};
use crate::encode::{plan_root, EncodeCtx};
use crate::error::{bail, error, Result};
use crate::reflect;
use crate::schema::Schema;
use crate::stream::mux::{self, DemuxRouter, FrameKind};
use crate::value::{Decoded, Value};
use crate::write::WriteCursor;

/// Tunables for one session. The channel buffer is the only backpressure
/// knob exposed to callers (§5 "Suspension points") — everything else about
/// pacing is left to the transport itself.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub channel_buffer: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions { channel_buffer: 16 }
    }
}

/// Writes one session to `transport`: header, optional inline schema, the
/// root value, then drains multiplexed frames until every sub-stream this
/// value opened has reached its terminal frame (§4.8 "Encode path").
///
/// `peer_digest` is the schema digest the caller believes the far end
/// already holds (e.g. from a prior session on the same connection);
/// equality with `schema.digest()` suppresses the inline schema bytes.
pub async fn encode_session<W>(schema: &Schema, value: &Value, peer_digest: Option<[u8; 32]>, mut transport: W, opts: &SessionOptions) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let _ = opts;
    let ctx = EncodeCtx::new();
    let inline_schema = peer_digest != Some(schema.digest());

    let mut header = Vec::new();
    header.push(if inline_schema { 0x01 } else { 0x00 });
    if inline_schema {
        schema.write_bytes(&mut header).expect("writing to Vec is infallible");
    }

    let planned = plan_root(schema, value, &ctx)?;
    let mut cursor = WriteCursor::with_capacity(planned.size);
    (planned.emit)(&mut cursor, &ctx);
    let root_bytes = cursor.finish(planned.size)?;

    transport.write_all(&header).await?;
    transport.write_all(&root_bytes).await?;
    transport.flush().await?;

    // Streaming leaves (if any) reserved channels and started producer
    // tasks during `plan`/emit above; go_live hands them the live sender
    // and flushes anything they queued before the root finished writing
    // (§4.2 "pending queue").
    let (tx, mut rx) = mpsc::unbounded_channel();
    ctx.mux.go_live(tx);

    while ctx.mux.has_open_channels() {
        match rx.recv().await {
            Some(frame) => {
                let terminal = matches!(frame.kind, FrameKind::End | FrameKind::Error);
                let bytes = mux::encode_frame(&frame);
                transport.write_all(&bytes).await?;
                transport.flush().await?;
                if terminal {
                    ctx.mux.channel_closed();
                }
            }
            // Every producer task dropped its sender without sending a
            // terminal frame — can't happen under this crate's own
            // producer loops (each always ends in End/Error), but a
            // panicking producer task would get here; treat it the same
            // as having reached quiescence rather than spinning forever.
            None => break,
        }
    }

    transport.shutdown().await?;
    Ok(())
}

/// Reads one session from `transport`: header, optional inline schema, the
/// root value (§4.8 "Decode path"). Returns immediately once the root value
/// is fully decoded — streaming leaves inside it are live consumer handles
/// backed by a dispatcher task spawned here, which keeps running in the
/// background until the transport closes or every registered channel has
/// released its registration (§4.7 "quiescence").
///
/// `caller_schema` is required when the header says `0x00` (schema omitted,
/// identified only by digest); it is ignored (and may be `None`) when the
/// header is `0x01`, since the wire-carried schema always wins in that case.
pub async fn decode_session<R>(caller_schema: Option<&Schema>, transport: R, opts: &SessionOptions) -> Result<(Schema, Decoded)>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut src = AsyncByteSource::new(transport);
    let header = src.read_byte().await?;
    let schema = match header {
        0x01 => reflect::reflect_async(&mut src).await?,
        0x00 => caller_schema.cloned().ok_or_else(|| error!(Protocol, "session header 0x00 (schema omitted) but no schema was supplied"))?,
        other => bail!(Protocol, "session header: expected 0x00 or 0x01, got 0x{other:02X}"),
    };

    let router = Arc::new(DemuxRouter::new());
    let ctx = DecodeCtx::with_router(router.clone(), opts.channel_buffer);
    let decoded = decode_value_async(&schema, &mut src, &ctx).await?;
    let mut transport = src.into_inner();

    tokio::spawn(async move {
        loop {
            match mux::read_frame_async(&mut transport).await {
                Ok(Some(frame)) => {
                    router.deliver(frame).await;
                    if router.is_quiescent() {
                        tracing::debug!("dispatcher reached quiescence, stopping");
                        break;
                    }
                }
                Ok(None) => {
                    tracing::debug!("transport closed, tearing down dispatcher");
                    router.close_all();
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "session dispatcher loop aborted");
                    router.close_all();
                    break;
                }
            }
        }
    });

    Ok((schema, decoded))
}

/// Convenience wrapper around [`decode_session`] for a fully-materialized
/// buffer rather than a live transport — the shape a promise/iterator
/// sub-stream payload already decodes in (`crate::decode::decode_value_bytes`),
/// offered here at the session level for callers that received a whole
/// session's bytes up front (e.g. read off a message queue) instead of
/// streaming it from a socket.
pub async fn decode_from_bytes(caller_schema: Option<&Schema>, bytes: Bytes, opts: &SessionOptions) -> Result<(Schema, Decoded)> {
    decode_session(caller_schema, std::io::Cursor::new(bytes), opts).await
}

/// An in-memory [`AsyncWrite`] sink, for serializing a session to a `Vec<u8>`
/// instead of a live transport (the write-side counterpart of
/// [`decode_from_bytes`]'s `std::io::Cursor<Bytes>`).
pub struct VecSink(Vec<u8>);

impl VecSink {
    pub fn new() -> Self {
        VecSink(Vec::new())
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl Default for VecSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncWrite for VecSink {
    fn poll_write(mut self: Pin<&mut Self>, _cx: &mut TaskContext<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        self.0.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Encodes one session into a freshly-allocated buffer rather than a live
/// transport.
pub async fn encode_to_vec(schema: &Schema, value: &Value, peer_digest: Option<[u8; 32]>, opts: &SessionOptions) -> Result<Vec<u8>> {
    let mut sink = VecSink::new();
    encode_session(schema, value, peer_digest, &mut sink, opts).await?;
    Ok(sink.into_inner())
}
