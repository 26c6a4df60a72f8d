//! The dynamic value tree (§3): one enum wide enough to hold any value this
//! crate can encode or decode, mirroring the role `binschema::value::Value`
//! plays against `binschema::Schema` — a schema describes a shape, a `Value`
//! is data conforming (or not yet validated as conforming) to that shape.
//!
//! Streaming leaves (`Promise`, `Iterator`, `ReadableStream`) carry their
//! producer as a take-once interior-mutable cell rather than plain owned
//! data: the planner (`crate::plan`) walks `&Value` to compute a size, then
//! the emitter needs to move an owned, `'static` producer out into a spawned
//! task. A `Mutex<Option<_>>` reconciles "shared during planning" with
//! "owned during emission" without unsafe code.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use crate::error::Error;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The outcome of a promise/iterator-item producer: either a value, or a
/// `Serializable`-kind error to be relayed to the one consumer (§4.7, §7).
pub type ProducerResult<T> = std::result::Result<T, Error>;

/// Produces the resolved value of a `promise` schema node. Taken exactly
/// once, at emit time.
pub struct PromiseProducer(Mutex<Option<BoxFuture<ProducerResult<Value>>>>);

impl PromiseProducer {
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = ProducerResult<Value>> + Send + 'static,
    {
        PromiseProducer(Mutex::new(Some(Box::pin(fut))))
    }

    /// Takes ownership of the underlying future. Panics if called twice —
    /// that would mean the planner visited this node's emit phase more than
    /// once, which is an internal bug, not a caller error.
    pub fn take(&self) -> BoxFuture<ProducerResult<Value>> {
        self.0
            .lock()
            .unwrap()
            .take()
            .expect("PromiseProducer taken more than once")
    }
}

impl fmt::Debug for PromiseProducer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("PromiseProducer(..)")
    }
}

/// Produces successive items of an `iterator` schema node. `next()` returns
/// `Ok(None)` on graceful end-of-items, `Err` for a mid-stream error (§4.7).
pub trait IteratorProducer: Send {
    fn next(&mut self) -> BoxFuture<ProducerResult<Option<Value>>>;
}

pub struct IteratorHandle(Mutex<Option<Box<dyn IteratorProducer>>>);

impl IteratorHandle {
    pub fn new(producer: Box<dyn IteratorProducer>) -> Self {
        IteratorHandle(Mutex::new(Some(producer)))
    }

    pub fn take(&self) -> Box<dyn IteratorProducer> {
        self.0.lock().unwrap().take().expect("IteratorHandle taken more than once")
    }
}

impl fmt::Debug for IteratorHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("IteratorHandle(..)")
    }
}

/// Produces successive chunks of a `readable-stream` schema node. Distinct
/// from [`IteratorProducer`] in that chunks are always `Bytes`, never
/// schema-typed values (§4.6).
pub trait ByteStreamProducer: Send {
    fn next(&mut self) -> BoxFuture<ProducerResult<Option<Bytes>>>;
}

pub struct ReadableStreamHandle(Mutex<Option<Box<dyn ByteStreamProducer>>>);

impl ReadableStreamHandle {
    pub fn new(producer: Box<dyn ByteStreamProducer>) -> Self {
        ReadableStreamHandle(Mutex::new(Some(producer)))
    }

    pub fn take(&self) -> Box<dyn ByteStreamProducer> {
        self.0.lock().unwrap().take().expect("ReadableStreamHandle taken more than once")
    }
}

impl fmt::Debug for ReadableStreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("ReadableStreamHandle(..)")
    }
}

/// The decoded counterpart of [`Value`] (§4.6, §4.7). Everything that isn't
/// a streaming leaf decodes to the same shape as its encode-side `Value`;
/// the three streaming leaves decode to *consumer handles*
/// (`crate::stream::{promise,iterator,readable}`) instead of producers,
/// since a decode session doesn't have a value to hand back yet — it has a
/// live sub-stream registration the caller pulls from.
#[derive(Debug)]
pub enum Decoded {
    Null,
    Absent,
    Boolean(bool),
    Uint8(u8),
    Uint(u64),
    Int(i64),
    Float(f64),
    BigInt(i128),
    Str(String),
    Bytes(Bytes),
    Date(i64),
    Array(Vec<Decoded>),
    Object(BTreeMap<String, Decoded>),
    Record(BTreeMap<String, Decoded>),
    Map(Vec<(Decoded, Decoded)>),
    Promise(crate::stream::promise::PromiseHandle),
    Iterator(crate::stream::iterator::IteratorConsumer),
    ReadableStream(crate::stream::readable::ReadableStreamConsumer),
}

impl Decoded {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Decoded::Null => "null",
            Decoded::Absent => "absent",
            Decoded::Boolean(_) => "boolean",
            Decoded::Uint8(_) => "uint8",
            Decoded::Uint(_) => "uint",
            Decoded::Int(_) => "int",
            Decoded::Float(_) => "float",
            Decoded::BigInt(_) => "bigint",
            Decoded::Str(_) => "string",
            Decoded::Bytes(_) => "bytes",
            Decoded::Date(_) => "date",
            Decoded::Array(_) => "array",
            Decoded::Object(_) => "object",
            Decoded::Record(_) => "record",
            Decoded::Map(_) => "map",
            Decoded::Promise(_) => "promise",
            Decoded::Iterator(_) => "iterator",
            Decoded::ReadableStream(_) => "readable-stream",
        }
    }
}

#[derive(Debug)]
pub enum Value {
    /// The sentinel for `nullable`'s "present but null" case, and the only
    /// legal value of a naked `Schema::Nullable(None)`.
    Null,
    /// The sentinel for `optional`'s "field/slot absent" case. Never valid
    /// against any schema other than `Optional(_)`.
    Absent,
    Boolean(bool),
    Uint8(u8),
    Uint(u64),
    Int(i64),
    Float(f64),
    BigInt(i128),
    Str(String),
    /// Shared representation for both `u8-array` and `buffer` schemas (the
    /// distinction is a wire/tag-only one — see `SPEC_FULL.md`).
    Bytes(Bytes),
    Date(i64),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Record(BTreeMap<String, Value>),
    Map(Vec<(Value, Value)>),
    Promise(PromiseProducer),
    Iterator(IteratorHandle),
    ReadableStream(ReadableStreamHandle),
}

impl Value {
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Best-effort debug rendering; streaming leaves can't be cloned or
    /// deep-inspected without consuming their producer, so they print as a
    /// placeholder in error messages (§5 reflect diagnostics).
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Absent => "absent",
            Value::Boolean(_) => "boolean",
            Value::Uint8(_) => "uint8",
            Value::Uint(_) => "uint",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::BigInt(_) => "bigint",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Record(_) => "record",
            Value::Map(_) => "map",
            Value::Promise(_) => "promise",
            Value::Iterator(_) => "iterator",
            Value::ReadableStream(_) => "readable-stream",
        }
    }
}
