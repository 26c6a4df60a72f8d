//! Reflection (§4.6): the two directions that let a schema travel as data
//! rather than only as a compile-time shape.
//!
//! `reflect_bytes` inverts `Schema::write_bytes` — it has to parse exactly
//! the grammar that module emits, tag by tag. `infer_schema` goes the other
//! way, walking a `Value` to produce the narrowest schema it validates
//! against; it backs the `any` constructor (§4.4) the same way
//! `binschema`'s `Schema::of::<T>()` backs typed (de)serialization there,
//! except it works from a runtime value instead of a Rust type.

use std::future::Future;
use std::pin::Pin;

use crate::error::{bail, Result};
use crate::schema::{ObjectField, Schema, Tag};
use crate::value::Value;

/// A borrowing counterpart of [`crate::value::BoxFuture`]: recursive async
/// fns (`reflect_async`, `crate::decode::decode_value_async`) need to box
/// their own call graph, and each recursive call borrows the shared byte
/// source for `'a` rather than owning it.
pub(crate) type RecurseFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Parses a schema from its canonical byte-representation (§6). Returns the
/// schema together with however much of `buf` followed it, so callers
/// embedding a schema inline (the `any` payload, the session header) can
/// continue reading from the same cursor.
pub fn reflect_bytes(buf: &[u8]) -> Result<(Schema, &[u8])> {
    if buf.is_empty() {
        bail!(Protocol, "schema bytes: expected a tag byte, found none");
    }
    let tag_byte = buf[0];
    let rest = &buf[1..];
    let tag = Tag::from_byte(tag_byte).ok_or_else(|| crate::error::error!(Protocol, "unknown schema tag byte 0x{:02X}", tag_byte))?;
    Ok(match tag {
        Tag::Array => {
            let (inner, rest) = reflect_bytes(rest)?;
            (Schema::array(inner), rest)
        }
        Tag::Object => {
            let (n, mut rest) = crate::varint::read_uint_slice(rest)?;
            let mut fields = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let (namelen, r) = crate::varint::read_uint_slice(rest)?;
                let namelen = namelen as usize;
                if r.len() < namelen {
                    bail!(Protocol, "schema bytes: truncated object field name");
                }
                let name = std::str::from_utf8(&r[..namelen])
                    .map_err(|e| crate::error::error!(Protocol, "schema bytes: object field name not UTF-8: {e}"))?
                    .to_owned();
                let (child, r) = reflect_bytes(&r[namelen..])?;
                fields.push(ObjectField { name, schema: child });
                rest = r;
            }
            // Field bytes were already written in sorted order (§3
            // invariants); `Schema::object` re-sorts defensively, which is a
            // no-op here but keeps this path honest about the invariant.
            (Schema::object(fields), rest)
        }
        Tag::Str => (Schema::Str, rest),
        Tag::U8Array => (Schema::U8Array, rest),
        Tag::Buffer => (Schema::Buffer, rest),
        Tag::Promise => {
            let (inner, rest) = reflect_bytes(rest)?;
            (Schema::promise(inner), rest)
        }
        Tag::Iterator => {
            let (inner, rest) = reflect_bytes(rest)?;
            (Schema::iterator(inner), rest)
        }
        Tag::Boolean => (Schema::Boolean, rest),
        Tag::Uint8 => (Schema::Uint8, rest),
        Tag::Uint => (Schema::Uint, rest),
        Tag::Union => {
            let (n_minus_1, mut rest) = crate::varint::read_uint_slice(rest)?;
            let n = n_minus_1 + 1;
            let mut alts = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let (alt, r) = reflect_bytes(rest)?;
                alts.push(alt);
                rest = r;
            }
            (Schema::Union(alts), rest)
        }
        Tag::Date => (Schema::Date, rest),
        Tag::Int => (Schema::Int, rest),
        Tag::Float => (Schema::Float, rest),
        Tag::Nullable => {
            if rest.first() == Some(&0x00) {
                (Schema::naked_nullable(), &rest[1..])
            } else {
                let (inner, rest) = reflect_bytes(rest)?;
                (Schema::nullable(inner), rest)
            }
        }
        Tag::Optional => {
            let (inner, rest) = reflect_bytes(rest)?;
            (Schema::optional(inner), rest)
        }
        Tag::BigInt => (Schema::BigInt, rest),
        Tag::ReadableStream => (Schema::ReadableStream, rest),
        Tag::Record => {
            let (inner, rest) = reflect_bytes(rest)?;
            (Schema::record(inner), rest)
        }
        Tag::Map => {
            let (key, rest) = reflect_bytes(rest)?;
            let (value, rest) = reflect_bytes(rest)?;
            (Schema::map(key, value), rest)
        }
        Tag::PotentiallyFloatString => (Schema::PotentiallyFloatString, rest),
        Tag::Any => (Schema::Any, rest),
        Tag::CompressionTable => {
            let (inner, rest) = reflect_bytes(rest)?;
            // The `deep` flag is a write-side-only optimization hint (§4.4)
            // and isn't part of the byte-representation; reflected schemas
            // default to shallow (identity-only) dedup.
            (Schema::compression_table(inner, false), rest)
        }
    })
}

/// Async counterpart of [`reflect_bytes`], reading the schema grammar
/// directly off the session transport instead of an in-memory slice
/// (§4.3, §4.8 "if schema-present, reflect inline"). Structurally the same
/// recursive descent over [`Tag`]; duplicated rather than shared because
/// async recursion needs boxing and the two readers (`&[u8]` vs
/// [`crate::asyncio::AsyncByteSource`]) don't share a trait in this crate.
pub fn reflect_async<'a, R>(src: &'a mut crate::asyncio::AsyncByteSource<R>) -> RecurseFuture<'a, Result<Schema>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'a,
{
    Box::pin(async move {
        let tag_byte = src.read_byte().await?;
        let tag = Tag::from_byte(tag_byte).ok_or_else(|| crate::error::error!(Protocol, "unknown schema tag byte 0x{:02X}", tag_byte))?;
        Ok(match tag {
            Tag::Array => Schema::array(reflect_async(src).await?),
            Tag::Object => {
                let n = src.read_uint().await?;
                let mut fields = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let namelen = src.read_uint().await? as usize;
                    let name_bytes = src.read_n(namelen).await?;
                    let name = std::str::from_utf8(&name_bytes)
                        .map_err(|e| crate::error::error!(Protocol, "schema bytes: object field name not UTF-8: {e}"))?
                        .to_owned();
                    let child = reflect_async(src).await?;
                    fields.push(ObjectField { name, schema: child });
                }
                Schema::object(fields)
            }
            Tag::Str => Schema::Str,
            Tag::U8Array => Schema::U8Array,
            Tag::Buffer => Schema::Buffer,
            Tag::Promise => Schema::promise(reflect_async(src).await?),
            Tag::Iterator => Schema::iterator(reflect_async(src).await?),
            Tag::Boolean => Schema::Boolean,
            Tag::Uint8 => Schema::Uint8,
            Tag::Uint => Schema::Uint,
            Tag::Union => {
                let n = src.read_uint().await? + 1;
                let mut alts = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    alts.push(reflect_async(src).await?);
                }
                Schema::Union(alts)
            }
            Tag::Date => Schema::Date,
            Tag::Int => Schema::Int,
            Tag::Float => Schema::Float,
            Tag::Nullable => {
                if src.peek_byte().await? == 0x00 {
                    let _ = src.read_byte().await?;
                    Schema::naked_nullable()
                } else {
                    Schema::nullable(reflect_async(src).await?)
                }
            }
            Tag::Optional => Schema::optional(reflect_async(src).await?),
            Tag::BigInt => Schema::BigInt,
            Tag::ReadableStream => Schema::ReadableStream,
            Tag::Record => Schema::record(reflect_async(src).await?),
            Tag::Map => {
                let key = reflect_async(src).await?;
                let value = reflect_async(src).await?;
                Schema::map(key, value)
            }
            Tag::PotentiallyFloatString => Schema::PotentiallyFloatString,
            Tag::Any => Schema::Any,
            // `deep` isn't part of the byte-representation, see `reflect_bytes`.
            Tag::CompressionTable => Schema::compression_table(reflect_async(src).await?, false),
        })
    })
}

/// `Schema::from_bytes(&s.to_bytes()) == s` for every constructed `Schema`
/// (§8 "Schema round-trip") relies on the trailing slice being empty;
/// callers that embed a schema inline should use [`reflect_bytes`] directly
/// and check `rest` themselves instead of this convenience wrapper when
/// more bytes are expected to follow.
pub fn schema_from_bytes(buf: &[u8]) -> Result<Schema> {
    let (schema, rest) = reflect_bytes(buf)?;
    if !rest.is_empty() {
        bail!(Protocol, "schema bytes: {} trailing byte(s) after a complete schema", rest.len());
    }
    Ok(schema)
}

/// Infers the narrowest schema `value` validates against (§4.6), backing
/// the `any` constructor. Cycles are impossible here: `Value` is an owned
/// tree with no shared/back references, so the cycle-detection the spec
/// calls for in a dynamically-typed host is structurally moot in this
/// implementation (see DESIGN.md).
pub fn infer_schema(value: &Value) -> Result<Schema> {
    Ok(match value {
        Value::Absent => bail!(Validation, "cannot infer a schema for an absent value"),
        Value::Null => Schema::naked_nullable(),
        Value::Boolean(_) => Schema::Boolean,
        Value::Uint8(_) => Schema::Uint8,
        Value::Uint(_) => Schema::Uint,
        Value::Int(_) => Schema::Int,
        Value::Float(_) => Schema::Float,
        Value::BigInt(_) => Schema::BigInt,
        Value::Str(_) => Schema::Str,
        Value::Bytes(_) => Schema::U8Array,
        Value::Date(_) => Schema::Date,
        Value::Array(items) => {
            if items.is_empty() {
                Schema::array(Schema::Any)
            } else {
                Schema::array(union_of_inferred(items.iter())?)
            }
        }
        Value::Object(fields) => {
            let mut inferred = Vec::with_capacity(fields.len());
            for (name, v) in fields {
                inferred.push(ObjectField { name: name.clone(), schema: infer_schema(v)? });
            }
            Schema::object(inferred)
        }
        Value::Record(fields) => {
            if fields.is_empty() {
                Schema::record(Schema::Any)
            } else {
                Schema::record(union_of_inferred(fields.values())?)
            }
        }
        Value::Map(entries) => {
            if entries.is_empty() {
                Schema::map(Schema::Any, Schema::Any)
            } else {
                let keys = union_of_inferred(entries.iter().map(|(k, _)| k))?;
                let values = union_of_inferred(entries.iter().map(|(_, v)| v))?;
                Schema::map(keys, values)
            }
        }
        Value::Promise(_) => Schema::promise(Schema::Any),
        Value::Iterator(_) => Schema::iterator(Schema::Any),
        Value::ReadableStream(_) => Schema::ReadableStream,
    })
}

/// Infers each value's schema and collapses duplicates, yielding a single
/// schema directly when only one distinct shape is present and a `union`
/// over the unique shapes otherwise (§4.6 "arrays → array(union(unique
/// element schemas))").
fn union_of_inferred<'v>(values: impl Iterator<Item = &'v Value>) -> Result<Schema> {
    let mut unique: Vec<Schema> = Vec::new();
    for v in values {
        let s = infer_schema(v)?;
        if !unique.contains(&s) {
            unique.push(s);
        }
    }
    if unique.len() == 1 {
        Ok(unique.into_iter().next().unwrap())
    } else {
        Schema::union(unique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ObjectField;

    #[test]
    fn schema_bytes_round_trip_scalars() {
        for schema in [Schema::Boolean, Schema::Uint, Schema::Str, Schema::naked_nullable(), Schema::Any] {
            let bytes = schema.to_bytes();
            let reflected = schema_from_bytes(&bytes).unwrap();
            assert_eq!(reflected.to_bytes(), bytes);
        }
    }

    #[test]
    fn schema_bytes_round_trip_composites() {
        let schema = Schema::object(vec![
            ObjectField { name: "b".into(), schema: Schema::Uint8 },
            ObjectField { name: "a".into(), schema: Schema::array(Schema::Str) },
        ]);
        let bytes = schema.to_bytes();
        let reflected = schema_from_bytes(&bytes).unwrap();
        assert_eq!(reflected.to_bytes(), bytes);
        assert_eq!(reflected, schema);
    }

    #[test]
    fn nullable_naked_vs_inner_round_trip() {
        for schema in [Schema::naked_nullable(), Schema::nullable(Schema::Uint)] {
            let bytes = schema.to_bytes();
            let (reflected, rest) = reflect_bytes(&bytes).unwrap();
            assert!(rest.is_empty());
            assert_eq!(reflected, schema);
        }
    }

    #[test]
    fn unknown_tag_is_protocol_error() {
        let err = schema_from_bytes(&[0xEE]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);
    }

    #[test]
    fn infer_schema_for_scalars_and_containers() {
        assert_eq!(infer_schema(&Value::Boolean(true)).unwrap(), Schema::Boolean);
        assert_eq!(infer_schema(&Value::Uint(3)).unwrap(), Schema::Uint);
        assert_eq!(infer_schema(&Value::Null).unwrap(), Schema::naked_nullable());
        assert_eq!(infer_schema(&Value::Array(vec![])).unwrap(), Schema::array(Schema::Any));

        let homogeneous = Value::Array(vec![Value::Uint(1), Value::Uint(2)]);
        assert_eq!(infer_schema(&homogeneous).unwrap(), Schema::array(Schema::Uint));

        let mixed = Value::Array(vec![Value::Uint(1), Value::Str("x".into())]);
        assert_eq!(infer_schema(&mixed).unwrap(), Schema::array(Schema::union(vec![Schema::Uint, Schema::Str]).unwrap()));
    }
}
