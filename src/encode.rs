//! The two-phase write path (§4.2, §4.4): plan computes an exact size and a
//! write closure per node, emit runs the closures into one preallocated
//! buffer. Streaming nodes are discovered during planning (they reserve a
//! channel id up front) and spawn their producer task during emit, once the
//! channel id is already committed to the buffer.
//!
//! None of `binschema`'s `Encoder` carries this split — it streams directly
//! to a `Write` — because nothing in that crate needs to discover
//! out-of-band async work before committing to a buffer size. The
//! size-then-write split itself is still grounded on `binschema::Schema`'s
//! per-constructor `write_bytes`/size reasoning; the two-phase wrapper
//! around it is this crate's own answer to §4.2's planning requirement.

use std::sync::Arc;

use bytes::Bytes;

use crate::compression::CompressionTable;
use crate::date;
use crate::error::{bail, Result};
use crate::schema::Schema;
use crate::stream::mux::{Frame, FrameKind, MuxWriter};
use crate::validate::{union_alternative_index, validate};
use crate::value::Value;
use crate::varint;
use crate::write::WriteCursor;

/// Shared state threaded through one serialize call: the channel-id
/// allocator/frame sink, and the compression scratchpad (§4.5, which is
/// "per serialize call", not per-node — so it has to be shared, not
/// recreated at each `compression_table` node).
#[derive(Clone)]
pub struct EncodeCtx {
    pub mux: Arc<MuxWriter>,
    pub compression: Arc<CompressionTable>,
}

impl EncodeCtx {
    pub fn new() -> Self {
        EncodeCtx { mux: Arc::new(MuxWriter::new()), compression: Arc::new(CompressionTable::new()) }
    }
}

impl Default for EncodeCtx {
    fn default() -> Self {
        Self::new()
    }
}

/// A planned node: its exact emitted size, and a closure that writes it.
/// The closure borrows the value tree (`'v`) but not `ctx` — `ctx` is
/// passed at emit time so the same `Planned` tree could in principle be
/// emitted more than once (it isn't, today, but nothing here assumes
/// single-use beyond the streaming leaves' producers).
pub struct Planned<'v> {
    pub size: usize,
    pub emit: Box<dyn FnOnce(&mut WriteCursor, &EncodeCtx) + 'v>,
}

/// Validates then plans `value` against `schema`. This is the entry point
/// for both the root value and any nested value encoded later (a promise's
/// resolution, an iterator's item) — each such nested encode shares the
/// session's `ctx` so their channel ids and compression-table entries come
/// from the same counters (§4.5).
pub fn plan_root<'v>(schema: &Schema, value: &'v Value, ctx: &EncodeCtx) -> Result<Planned<'v>> {
    validate(schema, value)?;
    plan(schema, value, ctx)
}

/// Encodes `schema`/`value` to a standalone byte buffer. Used for the
/// top-level non-streaming payload as well as for stream sub-payloads
/// (a promise's resolution, one iterator item) which are each framed
/// independently once their producer yields (§4.7).
pub fn encode_to_bytes(schema: &Schema, value: &Value, ctx: &EncodeCtx) -> Result<Bytes> {
    let planned = plan_root(schema, value, ctx)?;
    let size = planned.size;
    let mut cursor = WriteCursor::with_capacity(size);
    (planned.emit)(&mut cursor, ctx);
    cursor.finish(size)
}

fn plan<'v>(schema: &Schema, value: &'v Value, ctx: &EncodeCtx) -> Result<Planned<'v>> {
    Ok(match (schema, value) {
        (Schema::Boolean, Value::Boolean(b)) => {
            let b = *b;
            leaf(1, move |c, _| c.put_u8(b as u8))
        }
        (Schema::Uint8, Value::Uint8(v)) => {
            let v = *v;
            leaf(1, move |c, _| c.put_u8(v))
        }
        (Schema::Uint, Value::Uint(v)) => {
            let v = *v;
            leaf(varint::size(v), move |c, _| c.put_uint(v))
        }
        (Schema::Int, Value::Int(v)) => {
            let v = *v;
            leaf(varint::size(varint::zigzag_encode(v)), move |c, _| c.put_sint(v))
        }
        (Schema::Float, Value::Float(v)) => {
            let v = *v;
            leaf(8, move |c, _| c.put_f64_le(v))
        }
        (Schema::BigInt, Value::BigInt(v)) => {
            let v = *v as u64;
            leaf(8, move |c, _| c.put_u64_le(v))
        }
        (Schema::Str, Value::Str(s)) | (Schema::PotentiallyFloatString, Value::Str(s)) => {
            let bytes = s.as_bytes();
            leaf(varint::size(bytes.len() as u64) + bytes.len(), move |c, _| {
                c.put_uint(bytes.len() as u64);
                c.put_slice(bytes);
            })
        }
        (Schema::U8Array, Value::Bytes(b)) | (Schema::Buffer, Value::Bytes(b)) => {
            let len = b.len();
            let bytes = b.clone();
            leaf(varint::size(len as u64) + len, move |c, _| {
                c.put_uint(len as u64);
                c.put_slice(&bytes);
            })
        }
        (Schema::Date, Value::Date(millis)) => {
            let s = date::format_millis(*millis);
            let bytes = s.into_bytes();
            let len = bytes.len();
            leaf(varint::size(len as u64) + len, move |c, _| {
                c.put_uint(len as u64);
                c.put_slice(&bytes);
            })
        }

        (Schema::Nullable(None), Value::Null) => leaf(1, |c, _| c.put_u8(0)),
        (Schema::Nullable(Some(_)), Value::Null) => leaf(1, |c, _| c.put_u8(0)),
        (Schema::Nullable(Some(inner)), other) => {
            let child = plan(inner, other, ctx)?;
            Planned {
                size: 1 + child.size,
                emit: Box::new(move |c, ctx| {
                    c.put_u8(1);
                    (child.emit)(c, ctx);
                }),
            }
        }

        (Schema::Optional(_), Value::Absent) => leaf(1, |c, _| c.put_u8(0)),
        (Schema::Optional(inner), other) => {
            let child = plan(inner, other, ctx)?;
            Planned {
                size: 1 + child.size,
                emit: Box::new(move |c, ctx| {
                    c.put_u8(1);
                    (child.emit)(c, ctx);
                }),
            }
        }

        (Schema::Array(inner), Value::Array(items)) => {
            let mut size = varint::size(items.len() as u64);
            let mut children = Vec::with_capacity(items.len());
            for item in items {
                let p = plan(inner, item, ctx)?;
                size += p.size;
                children.push(p);
            }
            let count = items.len() as u64;
            Planned {
                size,
                emit: Box::new(move |c, ctx| {
                    c.put_uint(count);
                    for child in children {
                        (child.emit)(c, ctx);
                    }
                }),
            }
        }

        (Schema::Object(fields), Value::Object(map)) => {
            // Fields declared but absent in `map` validate only if the
            // field schema is `optional` (checked in `validate`); plan
            // against this shared implicit `Value::Absent` in that case.
            const ABSENT: Value = Value::Absent;
            let mut size = 0usize;
            let mut children = Vec::with_capacity(fields.len());
            for field in fields {
                let v = map.get(&field.name).unwrap_or(&ABSENT);
                let p = plan(&field.schema, v, ctx)?;
                size += p.size;
                children.push(p);
            }
            Planned {
                size,
                emit: Box::new(move |c, ctx| {
                    for child in children {
                        (child.emit)(c, ctx);
                    }
                }),
            }
        }

        (Schema::Record(inner), Value::Record(map)) => {
            let mut size = varint::size(map.len() as u64);
            let mut children = Vec::with_capacity(map.len());
            for (key, v) in map {
                let key_bytes = key.as_bytes();
                size += varint::size(key_bytes.len() as u64) + key_bytes.len();
                children.push((key.clone(), plan(inner, v, ctx)?));
            }
            for (_, p) in &children {
                size += p.size;
            }
            let count = map.len() as u64;
            Planned {
                size,
                emit: Box::new(move |c, ctx| {
                    c.put_uint(count);
                    for (key, child) in children {
                        let kb = key.as_bytes();
                        c.put_uint(kb.len() as u64);
                        c.put_slice(kb);
                        (child.emit)(c, ctx);
                    }
                }),
            }
        }

        (Schema::Map(key_schema, value_schema), Value::Map(entries)) => {
            let mut size = varint::size(entries.len() as u64);
            let mut children = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                let pk = plan(key_schema, k, ctx)?;
                let pv = plan(value_schema, v, ctx)?;
                size += pk.size + pv.size;
                children.push((pk, pv));
            }
            let count = entries.len() as u64;
            Planned {
                size,
                emit: Box::new(move |c, ctx| {
                    c.put_uint(count);
                    for (pk, pv) in children {
                        (pk.emit)(c, ctx);
                        (pv.emit)(c, ctx);
                    }
                }),
            }
        }

        (Schema::Union(alts), other) => {
            let index = union_alternative_index(alts, other)?;
            let child = plan(&alts[index], other, ctx)?;
            let idx = index as u64;
            Planned {
                size: varint::size(idx) + child.size,
                emit: Box::new(move |c, ctx| {
                    c.put_uint(idx);
                    (child.emit)(c, ctx);
                }),
            }
        }

        (Schema::CompressionTable(inner, deep), other) => {
            plan_compression_table(inner, *deep, other, ctx)?
        }

        (Schema::Any, other) => {
            let inferred = crate::reflect::infer_schema(other)?;
            validate(&inferred, other)?;
            let mut schema_bytes = Vec::new();
            inferred.write_bytes(&mut schema_bytes).expect("writing to Vec is infallible");
            let child = plan(&inferred, other, ctx)?;
            let header_len = schema_bytes.len();
            Planned {
                size: header_len + child.size,
                emit: Box::new(move |c, ctx| {
                    c.put_slice(&schema_bytes);
                    (child.emit)(c, ctx);
                }),
            }
        }

        (Schema::Promise(inner), Value::Promise(producer)) => plan_promise(inner, producer, ctx),
        (Schema::Iterator(inner), Value::Iterator(handle)) => plan_iterator(inner, handle, ctx),
        (Schema::ReadableStream, Value::ReadableStream(handle)) => plan_readable_stream(handle, ctx),

        // Already validated against `schema`; reaching here means `plan`
        // and `validate` disagree about some (schema, value) pairing.
        (schema, value) => bail!(
            Internal,
            "plan: validated value of kind '{}' has no plan arm for schema {:?}",
            value.kind_name(),
            schema.tag()
        ),
    })
}

fn leaf<'v>(size: usize, emit: impl FnOnce(&mut WriteCursor, &EncodeCtx) + 'v) -> Planned<'v> {
    Planned { size, emit: Box::new(emit) }
}

fn plan_compression_table<'v>(inner: &Schema, deep: bool, value: &'v Value, ctx: &EncodeCtx) -> Result<Planned<'v>> {
    let digest = crate::compression::canonical_digest(value);
    let (index, is_new) = ctx.compression.lookup_or_insert(digest);
    let _ = deep; // identity vs. deep dedup collapse to one digest-keyed table here (see DESIGN.md).
    if is_new {
        let child = plan(inner, value, ctx)?;
        let idx = 0u64;
        Ok(Planned {
            size: varint::size(idx) + child.size,
            emit: Box::new(move |c, ctx| {
                c.put_uint(idx);
                (child.emit)(c, ctx);
            }),
        })
    } else {
        let back_ref = index + 1;
        Ok(leaf(varint::size(back_ref), move |c, _| c.put_uint(back_ref)))
    }
}

fn plan_promise<'v>(inner: &Schema, producer: &'v crate::value::PromiseProducer, ctx: &EncodeCtx) -> Planned<'v> {
    let channel = ctx.mux.reserve_channel();
    let item_schema = inner.clone();
    let mux = ctx.mux.clone();
    let compression = ctx.compression.clone();
    Planned {
        size: 2,
        emit: Box::new(move |c, _ctx| {
            c.put_channel_id(channel);
            let fut = producer.take();
            tokio::spawn(async move {
                let inner_ctx = EncodeCtx { mux: mux.clone(), compression };
                match fut.await {
                    Ok(resolved) => match encode_to_bytes(&item_schema, &resolved, &inner_ctx) {
                        Ok(payload) => {
                            // A resolved promise still needs a terminal frame
                            // after its one `Data` frame — `Data` alone never
                            // decrements `MuxWriter::open_channels`, so the
                            // encoder's drain loop would otherwise wait on
                            // this channel forever (§4.7's single-frame
                            // promise payload is terminal by construction;
                            // this crate's explicit envelope needs its own
                            // `End` to say so).
                            mux.send(Frame { channel, kind: FrameKind::Data, payload });
                            mux.send(Frame { channel, kind: FrameKind::End, payload: Bytes::new() });
                        }
                        Err(e) => mux.send(error_frame(channel, e)),
                    },
                    Err(e) => mux.send(error_frame(channel, e)),
                }
            });
        }),
    }
}

fn plan_iterator<'v>(inner: &Schema, handle: &'v crate::value::IteratorHandle, ctx: &EncodeCtx) -> Planned<'v> {
    let channel = ctx.mux.reserve_channel();
    let item_schema = inner.clone();
    let mux = ctx.mux.clone();
    let compression = ctx.compression.clone();
    Planned {
        size: 2,
        emit: Box::new(move |c, _ctx| {
            c.put_channel_id(channel);
            let mut producer = handle.take();
            tokio::spawn(async move {
                let inner_ctx = EncodeCtx { mux: mux.clone(), compression };
                loop {
                    match producer.next().await {
                        Ok(Some(item)) => match encode_to_bytes(&item_schema, &item, &inner_ctx) {
                            Ok(payload) => mux.send(Frame { channel, kind: FrameKind::Data, payload }),
                            Err(e) => {
                                mux.send(error_frame(channel, e));
                                return;
                            }
                        },
                        Ok(None) => {
                            mux.send(Frame { channel, kind: FrameKind::End, payload: Bytes::new() });
                            return;
                        }
                        Err(e) => {
                            mux.send(error_frame(channel, e));
                            return;
                        }
                    }
                }
            });
        }),
    }
}

fn plan_readable_stream<'v>(handle: &'v crate::value::ReadableStreamHandle, ctx: &EncodeCtx) -> Planned<'v> {
    let channel = ctx.mux.reserve_channel();
    let mux = ctx.mux.clone();
    Planned {
        size: 2,
        emit: Box::new(move |c, _ctx| {
            c.put_channel_id(channel);
            let mut producer = handle.take();
            tokio::spawn(async move {
                loop {
                    match producer.next().await {
                        Ok(Some(chunk)) => {
                            // Empty chunks are filtered on write (§4.7) —
                            // a literal zero-length chunk can't appear as
                            // data since `varint(0)` is the EOF marker.
                            if chunk.is_empty() {
                                continue;
                            }
                            mux.send(Frame { channel, kind: FrameKind::Data, payload: chunk });
                        }
                        Ok(None) => {
                            mux.send(Frame { channel, kind: FrameKind::End, payload: Bytes::new() });
                            return;
                        }
                        Err(e) => {
                            mux.send(error_frame(channel, e));
                            return;
                        }
                    }
                }
            });
        }),
    }
}

/// Builds the terminal frame for a producer failure. Per §7, only
/// `Serializable` errors are expected here (a user-rejected promise/
/// iterator); anything else is this crate's bug, logged loudly since a
/// spawned task has no caller to propagate to.
fn error_frame(channel: u16, err: crate::error::Error) -> Frame {
    if let Some(ser) = err.as_serializable() {
        let mut buf = Vec::new();
        ser.schema.write_bytes(&mut buf).expect("writing to Vec is infallible");
        match encode_to_bytes(&ser.schema, &ser.value, &EncodeCtx::new()) {
            Ok(value_bytes) => {
                buf.extend_from_slice(&value_bytes);
                Frame { channel, kind: FrameKind::Error, payload: Bytes::from(buf) }
            }
            Err(e) => {
                tracing::error!(channel, error = %e, "failed to encode serializable-error payload");
                Frame { channel, kind: FrameKind::End, payload: Bytes::new() }
            }
        }
    } else {
        tracing::error!(channel, error = %err, "stream producer failed with a non-serializable error; closing channel");
        Frame { channel, kind: FrameKind::End, payload: Bytes::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ObjectField;
    use bytes::Bytes as B;

    fn encode(schema: &Schema, value: &Value) -> Vec<u8> {
        let ctx = EncodeCtx::new();
        encode_to_bytes(schema, value, &ctx).unwrap().to_vec()
    }

    #[test]
    fn concrete_spec_bytes_scalars() {
        assert_eq!(encode(&Schema::Uint, &Value::Uint(0)), vec![0x00]);
        assert_eq!(encode(&Schema::Uint, &Value::Uint(252)), vec![0xFC]);
        assert_eq!(encode(&Schema::Uint, &Value::Uint(253)), vec![0xFD, 0xFD, 0x00]);
        assert_eq!(encode(&Schema::Str, &Value::Str("".into())), vec![0x00]);
        assert_eq!(encode(&Schema::Str, &Value::Str("ab".into())), vec![0x02, 0x61, 0x62]);
        assert_eq!(encode(&Schema::Boolean, &Value::Boolean(false)), vec![0x00]);
        assert_eq!(encode(&Schema::Boolean, &Value::Boolean(true)), vec![0x01]);
    }

    #[test]
    fn concrete_spec_bytes_nullable_and_array() {
        let schema = Schema::nullable(Schema::Str);
        assert_eq!(encode(&schema, &Value::Null), vec![0x00]);
        assert_eq!(encode(&schema, &Value::Str("a".into())), vec![0x01, 0x01, 0x61]);

        let arr = Schema::array(Schema::Uint8);
        assert_eq!(encode(&arr, &Value::Array(vec![Value::Uint8(5), Value::Uint8(9)])), vec![0x02, 0x05, 0x09]);
    }

    #[test]
    fn concrete_spec_bytes_object_key_order() {
        let schema = Schema::object(vec![
            ObjectField { name: "a".into(), schema: Schema::Uint8 },
            ObjectField { name: "b".into(), schema: Schema::Uint8 },
        ]);
        let mut map = std::collections::BTreeMap::new();
        map.insert("b".into(), Value::Uint8(2));
        map.insert("a".into(), Value::Uint8(1));
        assert_eq!(encode(&schema, &Value::Object(map)), vec![0x01, 0x02]);
    }

    #[test]
    fn union_writes_first_matching_alternative_index() {
        let schema = Schema::union(vec![Schema::Uint, Schema::Str]).unwrap();
        let bytes = encode(&schema, &Value::Str("hi".into()));
        // index 1 (Str), varint(1) = 0x01, then "hi" as string
        assert_eq!(bytes[0], 0x01);
    }

    #[test]
    fn compression_table_dedups_repeats() {
        let schema = Schema::array(Schema::compression_table(Schema::Str, false));
        let value = Value::Array(vec![
            Value::Str("a".into()),
            Value::Str("a".into()),
            Value::Str("b".into()),
            Value::Str("a".into()),
        ]);
        let bytes = encode(&schema, &value);
        // count=4
        assert_eq!(bytes[0], 0x04);
        // first "a": index 0 (new) -> varint(0), then string "a"
        assert_eq!(&bytes[1..4], &[0x00, 0x01, b'a']);
        // second "a": back-ref to index 0 -> varint(1)
        assert_eq!(bytes[4], 0x01);
        // "b": new -> varint(0), then string "b"
        assert_eq!(&bytes[5..8], &[0x00, 0x01, b'b']);
        // third "a": back-ref to index 0 -> varint(1) again
        assert_eq!(bytes[8], 0x01);
    }

    #[test]
    fn bytes_value_round_trips_through_buffer_and_u8_array() {
        let data = B::from_static(b"xyz");
        assert_eq!(encode(&Schema::Buffer, &Value::Bytes(data.clone())), vec![0x03, b'x', b'y', b'z']);
        assert_eq!(encode(&Schema::U8Array, &Value::Bytes(data)), vec![0x03, b'x', b'y', b'z']);
    }
}
