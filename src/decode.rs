//! The read path (§4.3, §4.4, §4.6): decodes a byte buffer against a
//! `Schema`, producing a [`Decoded`] tree. Streaming leaves register a
//! channel with the session's [`DemuxRouter`] and return a consumer handle
//! instead of inline data — the dispatcher loop in `crate::session` is what
//! actually pushes frames to those handles as they arrive.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::date;
use crate::error::{bail, ensure, Result};
use crate::read::ReadCursor;
use crate::schema::Schema;
use crate::stream::iterator::IteratorConsumer;
use crate::stream::mux::DemuxRouter;
use crate::stream::promise::PromiseHandle;
use crate::stream::readable::ReadableStreamConsumer;
use crate::value::Decoded;

/// Per-session state the decoder needs when it crosses a streaming leaf:
/// where to register the new channel, and how deep each channel's mpsc
/// buffer should be (§5 "Suspension points" — this is the only real
/// backpressure knob exposed to callers).
#[derive(Clone)]
pub struct DecodeCtx {
    pub router: Arc<DemuxRouter>,
    pub channel_buffer: usize,
    /// Materialized compression-table entries, shared across every nested
    /// `decode_value`/`decode_value_bytes` call in one deserialize session
    /// (§4.5 — scratchpad scope is per-call, not per-node).
    compression: Arc<Mutex<Vec<Decoded>>>,
}

impl DecodeCtx {
    pub fn new(channel_buffer: usize) -> Self {
        DecodeCtx { router: Arc::new(DemuxRouter::new()), channel_buffer, compression: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Builds a context around a router the caller already owns — used by
    /// `crate::session::decode_session`, which needs the same router handed
    /// to the dispatcher task that outlives this context's decode call.
    pub fn with_router(router: Arc<DemuxRouter>, channel_buffer: usize) -> Self {
        DecodeCtx { router, channel_buffer, compression: Arc::new(Mutex::new(Vec::new())) }
    }

    fn push_compression_entry(&self, value: Decoded) {
        self.compression.lock().unwrap().push(value);
    }

    fn compression_entry(&self, index: usize) -> Result<Decoded> {
        let table = self.compression.lock().unwrap();
        let entry = table
            .get(index)
            .ok_or_else(|| crate::error::error!(Protocol, "compression table: index {index} out of range ({} entries)", table.len()))?;
        clone_decoded_shallow(entry)
    }
}

/// Decodes one value from `cursor` against `schema`. The top-level entry
/// point from `crate::session`; also reused by `encode`'s error-recovery
/// path is not needed here (decode never needs to decode its own output).
pub fn decode_value(schema: &Schema, cursor: &mut ReadCursor, ctx: &DecodeCtx) -> Result<Decoded> {
    Ok(match schema {
        Schema::Boolean => {
            let b = cursor.take_u8()?;
            ensure!(b == 0 || b == 1, Protocol, "boolean: expected 0x00/0x01, got 0x{b:02X}");
            Decoded::Boolean(b == 1)
        }
        Schema::Uint8 => Decoded::Uint8(cursor.take_u8()?),
        Schema::Uint => Decoded::Uint(cursor.take_uint()?),
        Schema::Int => Decoded::Int(cursor.take_sint()?),
        Schema::Float => Decoded::Float(cursor.take_f64_le()?),
        Schema::BigInt => Decoded::BigInt(cursor.take_u64_le()? as i128),
        Schema::Str | Schema::PotentiallyFloatString => Decoded::Str(decode_string(cursor)?),
        Schema::U8Array | Schema::Buffer => Decoded::Bytes(decode_bytes(cursor)?),
        Schema::Date => {
            let s = decode_string(cursor)?;
            Decoded::Date(date::parse_millis(&s)?)
        }

        Schema::Nullable(None) => {
            let flag = cursor.take_u8()?;
            ensure!(flag == 0, Protocol, "naked nullable: expected flag 0x00, got 0x{flag:02X}");
            Decoded::Null
        }
        Schema::Nullable(Some(inner)) => {
            let flag = cursor.take_u8()?;
            match flag {
                0 => Decoded::Null,
                1 => decode_value(inner, cursor, ctx)?,
                other => bail!(Protocol, "nullable: invalid flag byte 0x{other:02X}"),
            }
        }
        Schema::Optional(inner) => {
            let flag = cursor.take_u8()?;
            match flag {
                0 => Decoded::Absent,
                1 => decode_value(inner, cursor, ctx)?,
                other => bail!(Protocol, "optional: invalid flag byte 0x{other:02X}"),
            }
        }

        Schema::Array(inner) => {
            let count = cursor.take_uint()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(decode_value(inner, cursor, ctx)?);
            }
            Decoded::Array(items)
        }

        Schema::Object(fields) => {
            let mut map = BTreeMap::new();
            for field in fields {
                map.insert(field.name.clone(), decode_value(&field.schema, cursor, ctx)?);
            }
            Decoded::Object(map)
        }

        Schema::Record(inner) => {
            let count = cursor.take_uint()?;
            let mut map = BTreeMap::new();
            for _ in 0..count {
                let key = decode_string(cursor)?;
                let value = decode_value(inner, cursor, ctx)?;
                map.insert(key, value);
            }
            Decoded::Record(map)
        }

        Schema::Map(key_schema, value_schema) => {
            let count = cursor.take_uint()?;
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let k = decode_value(key_schema, cursor, ctx)?;
                let v = decode_value(value_schema, cursor, ctx)?;
                entries.push((k, v));
            }
            Decoded::Map(entries)
        }

        Schema::Union(alts) => {
            let index = cursor.take_uint()?;
            let alt = alts
                .get(index as usize)
                .ok_or_else(|| crate::error::error!(Protocol, "union: discriminator {index} out of range (0..{})", alts.len()))?;
            decode_value(alt, cursor, ctx)?
        }

        Schema::CompressionTable(inner, _deep) => decode_compression_table(inner, cursor, ctx)?,

        Schema::Any => {
            let (inferred, rest) = crate::reflect::reflect_bytes(cursor.remaining_slice())?;
            let consumed = cursor.remaining() - rest.len();
            cursor.advance(consumed)?;
            decode_value(&inferred, cursor, ctx)?
        }

        Schema::Promise(inner) => {
            let channel = cursor.take_channel_id()?;
            let rx = ctx.router.register(channel, ctx.channel_buffer);
            Decoded::Promise(PromiseHandle::new(channel, rx, ctx.router.clone(), (**inner).clone()))
        }
        Schema::Iterator(inner) => {
            let channel = cursor.take_channel_id()?;
            let rx = ctx.router.register(channel, ctx.channel_buffer);
            Decoded::Iterator(IteratorConsumer::new(channel, rx, ctx.router.clone(), (**inner).clone()))
        }
        Schema::ReadableStream => {
            let channel = cursor.take_channel_id()?;
            let rx = ctx.router.register(channel, ctx.channel_buffer);
            Decoded::ReadableStream(ReadableStreamConsumer::new(channel, rx, ctx.router.clone()))
        }
    })
}

fn decode_string(cursor: &mut ReadCursor) -> Result<String> {
    let len = cursor.take_uint()? as usize;
    let bytes = cursor.take(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| crate::error::error!(Protocol, "string: invalid UTF-8: {e}"))
}

fn decode_bytes(cursor: &mut ReadCursor) -> Result<Bytes> {
    let len = cursor.take_uint()? as usize;
    Ok(Bytes::copy_from_slice(cursor.take(len)?))
}

fn decode_compression_table(inner: &Schema, cursor: &mut ReadCursor, ctx: &DecodeCtx) -> Result<Decoded> {
    let index = cursor.take_uint()?;
    if index == 0 {
        let value = decode_value(inner, cursor, ctx)?;
        ctx.push_compression_entry(clone_decoded_shallow(&value)?);
        Ok(value)
    } else {
        ctx.compression_entry((index - 1) as usize)
    }
}

/// Copies a previously-materialized compression-table entry for reuse by a
/// later back-reference (§4.5 "copy-safety"). Non-streaming values clone
/// structurally; a streaming leaf can't be cloned (it's a live, single-owner
/// handle), so this crate's decode side treats repeated references to a
/// streaming entry as an error rather than silently aliasing a handle two
/// consumers would then race to drain (see DESIGN.md — narrower than the
/// spec's tee/buffered-fan-out scheme, which needs a host language that can
/// arbitrarily re-wrap a stream as "replay from the start").
fn clone_decoded_shallow(value: &Decoded) -> Result<Decoded> {
    Ok(match value {
        Decoded::Null => Decoded::Null,
        Decoded::Absent => Decoded::Absent,
        Decoded::Boolean(b) => Decoded::Boolean(*b),
        Decoded::Uint8(v) => Decoded::Uint8(*v),
        Decoded::Uint(v) => Decoded::Uint(*v),
        Decoded::Int(v) => Decoded::Int(*v),
        Decoded::Float(v) => Decoded::Float(*v),
        Decoded::BigInt(v) => Decoded::BigInt(*v),
        Decoded::Str(s) => Decoded::Str(s.clone()),
        Decoded::Bytes(b) => Decoded::Bytes(b.clone()),
        Decoded::Date(v) => Decoded::Date(*v),
        Decoded::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(clone_decoded_shallow(item)?);
            }
            Decoded::Array(out)
        }
        Decoded::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), clone_decoded_shallow(v)?);
            }
            Decoded::Object(out)
        }
        Decoded::Record(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), clone_decoded_shallow(v)?);
            }
            Decoded::Record(out)
        }
        Decoded::Map(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                out.push((clone_decoded_shallow(k)?, clone_decoded_shallow(v)?));
            }
            Decoded::Map(out)
        }
        Decoded::Promise(_) | Decoded::Iterator(_) | Decoded::ReadableStream(_) => {
            bail!(Internal, "compression table: streaming entries cannot be re-materialized for a back-reference")
        }
    })
}

/// Decodes one value from a standalone buffer — the shape promise/iterator
/// sub-stream payloads arrive in (§4.7), where each frame carries exactly
/// one schema-typed value with no surrounding root-header framing.
pub fn decode_value_bytes(schema: &Schema, bytes: &[u8], ctx: &DecodeCtx) -> Result<Decoded> {
    let mut cursor = ReadCursor::new(bytes);
    let value = decode_value(schema, &mut cursor, ctx)?;
    ensure!(cursor.remaining() == 0, Protocol, "{} trailing byte(s) after decoding a stream payload", cursor.remaining());
    Ok(value)
}

/// Decodes a serializable-error frame payload: schema bytes followed
/// immediately by the error value encoded under that schema (§4.7).
pub fn decode_serializable_error(payload: &[u8]) -> Result<crate::error::Error> {
    let (schema, rest) = crate::reflect::reflect_bytes(payload)?;
    let ctx = DecodeCtx::new(1);
    let data = decode_value_bytes(&schema, rest, &ctx)?;
    Ok(crate::error::Error::received_serializable(schema, data))
}

/// Async counterpart of [`decode_value`], reading directly off the session
/// transport via [`crate::asyncio::AsyncByteSource`] instead of an
/// already-buffered slice (§4.3, §4.8). Used only for the root value — once
/// it returns, every streaming leaf inside the tree has registered its
/// channel and the dispatcher loop in `crate::session` takes over the
/// transport for the rest of the session.
pub fn decode_value_async<'a, R>(
    schema: &'a Schema,
    src: &'a mut crate::asyncio::AsyncByteSource<R>,
    ctx: &'a DecodeCtx,
) -> crate::reflect::RecurseFuture<'a, Result<Decoded>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'a,
{
    Box::pin(async move {
        Ok(match schema {
            Schema::Boolean => {
                let b = src.read_byte().await?;
                ensure!(b == 0 || b == 1, Protocol, "boolean: expected 0x00/0x01, got 0x{b:02X}");
                Decoded::Boolean(b == 1)
            }
            Schema::Uint8 => Decoded::Uint8(src.read_byte().await?),
            Schema::Uint => Decoded::Uint(src.read_uint().await?),
            Schema::Int => Decoded::Int(src.read_sint().await?),
            Schema::Float => Decoded::Float(f64::from_le_bytes(src.read_n(8).await?.as_ref().try_into().unwrap())),
            Schema::BigInt => Decoded::BigInt(u64::from_le_bytes(src.read_n(8).await?.as_ref().try_into().unwrap()) as i128),
            Schema::Str | Schema::PotentiallyFloatString => Decoded::Str(decode_string_async(src).await?),
            Schema::U8Array | Schema::Buffer => Decoded::Bytes(decode_bytes_async(src).await?),
            Schema::Date => {
                let s = decode_string_async(src).await?;
                Decoded::Date(date::parse_millis(&s)?)
            }

            Schema::Nullable(None) => {
                let flag = src.read_byte().await?;
                ensure!(flag == 0, Protocol, "naked nullable: expected flag 0x00, got 0x{flag:02X}");
                Decoded::Null
            }
            Schema::Nullable(Some(inner)) => match src.read_byte().await? {
                0 => Decoded::Null,
                1 => decode_value_async(inner, src, ctx).await?,
                other => bail!(Protocol, "nullable: invalid flag byte 0x{other:02X}"),
            },
            Schema::Optional(inner) => match src.read_byte().await? {
                0 => Decoded::Absent,
                1 => decode_value_async(inner, src, ctx).await?,
                other => bail!(Protocol, "optional: invalid flag byte 0x{other:02X}"),
            },

            Schema::Array(inner) => {
                let count = src.read_uint().await?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(decode_value_async(inner, src, ctx).await?);
                }
                Decoded::Array(items)
            }

            Schema::Object(fields) => {
                let mut map = BTreeMap::new();
                for field in fields {
                    map.insert(field.name.clone(), decode_value_async(&field.schema, src, ctx).await?);
                }
                Decoded::Object(map)
            }

            Schema::Record(inner) => {
                let count = src.read_uint().await?;
                let mut map = BTreeMap::new();
                for _ in 0..count {
                    let key = decode_string_async(src).await?;
                    let value = decode_value_async(inner, src, ctx).await?;
                    map.insert(key, value);
                }
                Decoded::Record(map)
            }

            Schema::Map(key_schema, value_schema) => {
                let count = src.read_uint().await?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let k = decode_value_async(key_schema, src, ctx).await?;
                    let v = decode_value_async(value_schema, src, ctx).await?;
                    entries.push((k, v));
                }
                Decoded::Map(entries)
            }

            Schema::Union(alts) => {
                let index = src.read_uint().await?;
                let alt = alts
                    .get(index as usize)
                    .ok_or_else(|| crate::error::error!(Protocol, "union: discriminator {index} out of range (0..{})", alts.len()))?;
                decode_value_async(alt, src, ctx).await?
            }

            Schema::CompressionTable(inner, _deep) => {
                let index = src.read_uint().await?;
                if index == 0 {
                    let value = decode_value_async(inner, src, ctx).await?;
                    ctx.push_compression_entry(clone_decoded_shallow(&value)?);
                    value
                } else {
                    ctx.compression_entry((index - 1) as usize)?
                }
            }

            Schema::Any => {
                let inferred = crate::reflect::reflect_async(src).await?;
                decode_value_async(&inferred, src, ctx).await?
            }

            Schema::Promise(inner) => {
                let channel = src.read_channel_id().await?;
                let rx = ctx.router.register(channel, ctx.channel_buffer);
                Decoded::Promise(PromiseHandle::new(channel, rx, ctx.router.clone(), (**inner).clone()))
            }
            Schema::Iterator(inner) => {
                let channel = src.read_channel_id().await?;
                let rx = ctx.router.register(channel, ctx.channel_buffer);
                Decoded::Iterator(IteratorConsumer::new(channel, rx, ctx.router.clone(), (**inner).clone()))
            }
            Schema::ReadableStream => {
                let channel = src.read_channel_id().await?;
                let rx = ctx.router.register(channel, ctx.channel_buffer);
                Decoded::ReadableStream(ReadableStreamConsumer::new(channel, rx, ctx.router.clone()))
            }
        })
    })
}

async fn decode_string_async<R>(src: &mut crate::asyncio::AsyncByteSource<R>) -> Result<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let len = src.read_uint().await? as usize;
    let bytes = src.read_n(len).await?;
    String::from_utf8(bytes.to_vec()).map_err(|e| crate::error::error!(Protocol, "string: invalid UTF-8: {e}"))
}

async fn decode_bytes_async<R>(src: &mut crate::asyncio::AsyncByteSource<R>) -> Result<Bytes>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let len = src.read_uint().await? as usize;
    src.read_n(len).await
}
