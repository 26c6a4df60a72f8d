//! Frame routing over the single ordered transport (§4.5).
//!
//! A session has exactly one background writer task and one background
//! reader task, each owning the transport half exclusively — there is no
//! locking on the actual `AsyncRead`/`AsyncWrite`, only on the small
//! in-memory structures ([`MuxWriter`]'s pending queue, [`DemuxRouter`]'s
//! channel table) that feed and drain them. This mirrors the single-task-
//! owns-the-socket shape in `bgql_runtime`'s `BinaryProtocol` encode/decode
//! loops, generalized from one stream to many multiplexed over channel ids.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::error::{bail, Result};
use crate::varint;

/// A routed unit on the wire: `[channel_id: u16 BE][kind: u8][len][payload]`
/// (§6 "Routing frame layout" — big-endian, unlike every other multi-byte
/// field in this crate, which is little-endian; preserved as specified).
#[derive(Debug, Clone)]
pub struct Frame {
    pub channel: u16,
    pub kind: FrameKind,
    pub payload: Bytes,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameKind {
    /// One item (iterator element, readable-stream chunk, or a promise's
    /// sole resolution value) follows in `payload`.
    Data = 0,
    /// The producer is done; no more frames will arrive on this channel.
    End = 1,
    /// The producer rejected/errored; `payload` holds a schema-bytes-length-
    /// prefixed schema followed by the encoded error value (§4.7, §7).
    Error = 2,
    /// The consumer dropped its handle without reading to completion; sent
    /// from the consumer side back to the producer side (§4.7 "slurp
    /// release").
    Cancel = 3,
}

impl FrameKind {
    fn from_byte(b: u8) -> Option<FrameKind> {
        Some(match b {
            0 => FrameKind::Data,
            1 => FrameKind::End,
            2 => FrameKind::Error,
            3 => FrameKind::Cancel,
            _ => return None,
        })
    }
}

pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut buf = Vec::with_capacity(3 + frame.payload.len());
    buf.extend_from_slice(&frame.channel.to_be_bytes());
    buf.push(frame.kind as u8);
    varint::write_uint(&mut buf, frame.payload.len() as u64).expect("writing to Vec is infallible");
    buf.extend_from_slice(&frame.payload);
    Bytes::from(buf)
}

pub fn decode_frame_header(buf: &[u8]) -> Result<(u16, FrameKind, u64, usize)> {
    if buf.len() < 3 {
        bail!(Protocol, "frame header truncated");
    }
    let channel = u16::from_be_bytes([buf[0], buf[1]]);
    let kind = FrameKind::from_byte(buf[2]).ok_or_else(|| crate::error::error!(Protocol, "unknown frame kind byte {}", buf[2]))?;
    let (len, rest) = varint::read_uint_slice(&buf[3..])?;
    let header_len = buf.len() - rest.len();
    Ok((channel, kind, len, header_len))
}

/// Reads one [`Frame`] directly off the transport: `[channel BE u16][kind
/// u8][varint len][len bytes of payload]` (§6, §4.7). `Ok(None)` means the
/// transport ended cleanly right at a frame boundary — the ordinary way a
/// session winds down once every sub-stream has reached quiescence.
pub async fn read_frame_async<R>(r: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut id_buf = [0u8; 2];
    let mut filled = 0usize;
    loop {
        let n = r.read(&mut id_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            bail!(OutOfData, "transport closed mid frame header");
        }
        filled += n;
        if filled == id_buf.len() {
            break;
        }
    }
    let channel = u16::from_be_bytes(id_buf);
    let kind_byte = r.read_u8().await?;
    let kind = FrameKind::from_byte(kind_byte).ok_or_else(|| crate::error::error!(Protocol, "unknown frame kind byte {kind_byte}"))?;
    let len = varint::read_uint_async(r).await?;
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).await?;
    Ok(Some(Frame { channel, kind, payload: Bytes::from(payload) }))
}

/// Allocates channel ids on the encode side and routes outgoing frames,
/// queuing anything produced before the root value's bytes have finished
/// flushing to the transport (§4.2 "pending queue").
pub struct MuxWriter {
    next_channel: AtomicU16,
    state: Mutex<WriterState>,
    /// Count of reserved channels that haven't yet emitted a terminal
    /// (`End`/`Error`) frame — the write-side half of §4.7 "quiescence".
    /// `crate::session::encode_session` polls this to know when it can
    /// stop draining frames and close the transport.
    open_channels: AtomicU64,
}

enum WriterState {
    Pending(Vec<Frame>),
    Live(mpsc::UnboundedSender<Frame>),
}

impl MuxWriter {
    pub fn new() -> Self {
        MuxWriter { next_channel: AtomicU16::new(0), state: Mutex::new(WriterState::Pending(Vec::new())), open_channels: AtomicU64::new(0) }
    }

    /// Reserves the next channel id. Called during planning, before the
    /// producer task that will eventually write to it is spawned.
    pub fn reserve_channel(&self) -> u16 {
        self.open_channels.fetch_add(1, Ordering::SeqCst);
        let channel = self.next_channel.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(channel, "sub-stream channel opened");
        channel
    }

    /// Whether any reserved channel is still awaiting its terminal frame.
    pub fn has_open_channels(&self) -> bool {
        self.open_channels.load(Ordering::SeqCst) > 0
    }

    /// Records that a channel reached `End`/`Error` and will send no more
    /// frames.
    pub fn channel_closed(&self) {
        let remaining = self.open_channels.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            tracing::debug!("multiplexer reached quiescence");
        }
    }

    pub fn send(&self, frame: Frame) {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            WriterState::Pending(queue) => queue.push(frame),
            WriterState::Live(tx) => {
                let _ = tx.send(frame);
            }
        }
    }

    /// Switches to direct routing once the root value has been fully
    /// written, draining anything queued in the meantime in order.
    pub fn go_live(&self, tx: mpsc::UnboundedSender<Frame>) {
        let mut state = self.state.lock().unwrap();
        if let WriterState::Pending(queue) = &mut *state {
            for frame in queue.drain(..) {
                let _ = tx.send(frame);
            }
        }
        *state = WriterState::Live(tx);
    }
}

impl Default for MuxWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes incoming frames on the decode side to the per-channel consumer
/// registered for them. Channels are registered as root decoding reaches
/// the corresponding streaming node, which always happens before any frame
/// for that channel can arrive (the root value is the first thing sent).
pub struct DemuxRouter {
    channels: DashMap<u16, mpsc::Sender<Frame>>,
}

impl DemuxRouter {
    pub fn new() -> Self {
        DemuxRouter { channels: DashMap::new() }
    }

    pub fn register(&self, channel: u16, buffer: usize) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(buffer);
        self.channels.insert(channel, tx);
        rx
    }

    /// Delivers a fully-parsed frame to its registered channel. If no
    /// consumer is registered (the handle was dropped and its channel
    /// deregistered, or a quiescent channel reused its id — not possible
    /// within one session, but defensive), the frame is silently dropped:
    /// this is the decode-side half of "slurp release" (§4.7).
    pub async fn deliver(&self, frame: Frame) {
        let sender = self.channels.get(&frame.channel).map(|e| e.value().clone());
        if let Some(sender) = sender {
            let _ = sender.send(frame).await;
        }
    }

    pub fn deregister(&self, channel: u16) {
        self.channels.remove(&channel);
    }

    pub fn is_quiescent(&self) -> bool {
        self.channels.is_empty()
    }

    /// Drops every registered sender, which closes each consumer's receiver
    /// and surfaces `OutOfData` through its next `.recv()` (§4.7
    /// "Cancellation": transport closure while channels remain open
    /// delivers `out-of-data` to every pending handler).
    pub fn close_all(&self) {
        self.channels.clear();
    }
}

impl Default for DemuxRouter {
    fn default() -> Self {
        Self::new()
    }
}
