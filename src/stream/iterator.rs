//! Decode-side handle for an `iterator` schema node (§4.6).

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::decode::DecodeCtx;
use crate::error::{bail, Result};
use crate::schema::Schema;
use crate::stream::mux::{DemuxRouter, Frame, FrameKind};
use crate::value::Decoded;

/// A consumer handle for an `iterator` node. `next()` mirrors
/// `tokio::sync::mpsc::Receiver::recv` rather than implementing
/// `futures_core::Stream`, so this crate doesn't need to depend on
/// `futures`/`tokio-stream` just for this one trait.
pub struct IteratorConsumer {
    channel: u16,
    rx: mpsc::Receiver<Frame>,
    router: Arc<DemuxRouter>,
    item_schema: Schema,
    done: bool,
}

impl IteratorConsumer {
    pub(crate) fn new(channel: u16, rx: mpsc::Receiver<Frame>, router: Arc<DemuxRouter>, item_schema: Schema) -> Self {
        IteratorConsumer { channel, rx, router, item_schema, done: false }
    }

    /// Pulls the next item, or `None` at normal end-of-stream. `ctx` is
    /// reused for decoding each item so nested streaming nodes (an
    /// iterator of iterators) register on the same session-wide router.
    pub async fn next(&mut self, ctx: &DecodeCtx) -> Result<Option<Decoded>> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Frame { kind: FrameKind::Data, payload, .. }) => {
                crate::decode::decode_value_bytes(&self.item_schema, &payload, ctx).map(Some)
            }
            Some(Frame { kind: FrameKind::End, .. }) => {
                self.done = true;
                self.router.deregister(self.channel);
                Ok(None)
            }
            Some(Frame { kind: FrameKind::Error, payload, .. }) => {
                self.done = true;
                self.router.deregister(self.channel);
                Err(crate::decode::decode_serializable_error(&payload)?)
            }
            Some(Frame { kind, .. }) => bail!(Protocol, "iterator channel received unexpected frame kind {:?}", kind),
            None => bail!(OutOfData, "transport closed before iterator reached End"),
        }
    }
}

impl Drop for IteratorConsumer {
    fn drop(&mut self) {
        if !self.done {
            tracing::warn!(channel = self.channel, "iterator consumer dropped before End; falling back to slurp release");
        }
        self.router.deregister(self.channel);
    }
}

impl std::fmt::Debug for IteratorConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("IteratorConsumer").field("channel", &self.channel).field("done", &self.done).finish()
    }
}
