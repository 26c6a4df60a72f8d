//! Async streaming support: the multiplexer and the three streaming leaf
//! kinds (promise, iterator, readable-stream) that ride on top of it
//! (§4.5-§4.7).
//!
//! None of this exists in the crate this codebase is grounded on —
//! `binschema` is purely synchronous. The shape of the channel-routed
//! multiplexer below (numeric channel ids, a control enum, an async
//! read/write loop per direction) is grounded instead on the pack's async
//! examples: `bgql_runtime`'s `BinaryProtocol::encode_stream`/`decode_stream`
//! for the frame/control-channel idiom, and `summitd`'s session/dispatch
//! modules for the "one background task owns the transport" pattern.

pub mod iterator;
pub mod mux;
pub mod promise;
pub mod readable;

pub use mux::{DemuxRouter, Frame, FrameKind, MuxWriter};
