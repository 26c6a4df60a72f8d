//! Decode-side handle for a `readable-stream` schema node (§4.6).
//!
//! Chunks are raw bytes rather than schema-typed values — the one place
//! this crate's streaming model departs from the rest of the value
//! universe, matching `bgql_runtime`'s `BinaryStreamHandle`, which also
//! moves plain `Bytes` chunks rather than decoded application values.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{bail, Result};
use crate::stream::mux::{DemuxRouter, Frame, FrameKind};

pub struct ReadableStreamConsumer {
    channel: u16,
    rx: mpsc::Receiver<Frame>,
    router: Arc<DemuxRouter>,
    done: bool,
}

impl ReadableStreamConsumer {
    pub(crate) fn new(channel: u16, rx: mpsc::Receiver<Frame>, router: Arc<DemuxRouter>) -> Self {
        ReadableStreamConsumer { channel, rx, router, done: false }
    }

    pub async fn next(&mut self) -> Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Frame { kind: FrameKind::Data, payload, .. }) => Ok(Some(payload)),
            Some(Frame { kind: FrameKind::End, .. }) => {
                self.done = true;
                self.router.deregister(self.channel);
                Ok(None)
            }
            Some(Frame { kind: FrameKind::Error, payload, .. }) => {
                self.done = true;
                Err(crate::decode::decode_serializable_error(&payload)?)
            }
            Some(Frame { kind, .. }) => bail!(Protocol, "readable-stream channel received unexpected frame kind {:?}", kind),
            None => bail!(OutOfData, "transport closed before readable-stream reached End"),
        }
    }
}

impl Drop for ReadableStreamConsumer {
    fn drop(&mut self) {
        if !self.done {
            tracing::warn!(channel = self.channel, "readable-stream consumer dropped before End; falling back to slurp release");
        }
        self.router.deregister(self.channel);
    }
}

impl std::fmt::Debug for ReadableStreamConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ReadableStreamConsumer").field("channel", &self.channel).field("done", &self.done).finish()
    }
}
