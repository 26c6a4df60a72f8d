//! Decode-side handle for a `promise` schema node (§4.6).

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::decode::DecodeCtx;
use crate::error::{bail, Result};
use crate::schema::Schema;
use crate::stream::mux::{DemuxRouter, Frame, FrameKind};
use crate::value::Decoded;

/// The not-yet-resolved result of a `promise` node. Exactly one
/// [`Frame`] — `Data` (success) or `Error` (rejection) — is ever delivered
/// on this channel (§4.7).
pub struct PromiseHandle {
    channel: u16,
    rx: mpsc::Receiver<Frame>,
    router: Arc<DemuxRouter>,
    item_schema: Schema,
    settled: bool,
}

impl PromiseHandle {
    pub(crate) fn new(channel: u16, rx: mpsc::Receiver<Frame>, router: Arc<DemuxRouter>, item_schema: Schema) -> Self {
        PromiseHandle { channel, rx, router, item_schema, settled: false }
    }

    /// Awaits the promise's resolution, decoding the single delivered value
    /// against the promise's item schema. `ctx` supplies the channel
    /// registry and buffer depth used for any streaming nodes nested inside
    /// the resolved value itself (a promise of an iterator, say).
    pub async fn resolve(mut self, ctx: &DecodeCtx) -> Result<Decoded> {
        let frame = self.rx.recv().await;
        self.settled = frame.is_some();
        match frame {
            Some(Frame { kind: FrameKind::Data, payload, .. }) => {
                crate::decode::decode_value_bytes(&self.item_schema, &payload, ctx)
            }
            Some(Frame { kind: FrameKind::Error, payload, .. }) => {
                Err(crate::decode::decode_serializable_error(&payload)?)
            }
            Some(Frame { kind, .. }) => {
                bail!(Protocol, "promise channel received unexpected frame kind {:?}", kind)
            }
            None => bail!(OutOfData, "transport closed before promise resolved"),
        }
    }

    /// Explicit cancellation: deregisters without waiting for a result. The
    /// write side observes this as a "slurp release" — it keeps draining
    /// its producer to completion, but the frame it eventually sends lands
    /// on a channel nobody is listening to anymore (§4.7).
    pub fn cancel(mut self) {
        self.settled = true;
        self.router.deregister(self.channel);
    }
}

impl Drop for PromiseHandle {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(channel = self.channel, "promise handle dropped before resolving; falling back to slurp release");
        }
        self.router.deregister(self.channel);
    }
}

impl std::fmt::Debug for PromiseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PromiseHandle").field("channel", &self.channel).finish()
    }
}
