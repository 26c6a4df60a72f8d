//! The schema algebra: the closed set of type constructors and their
//! canonical byte-representation (§3, §6).
//!
//! A `Schema`'s byte-representation is its content-address: two schemas
//! with equal bytes are interchangeable. `Schema` values are immutable once
//! built, same as `binschema::Schema` in the crate this module is grounded
//! on, and for the same reason — both the wire format and the compression
//! table's "copy-safety" reasoning depend on structural, not nominal,
//! schema identity.

use crate::error::{bail, Result};
use crate::varint;
use sha2::{Digest, Sha256};
use std::io::Write;

/// Tag byte for each constructor (§6). Fixed; used both when writing
/// schema-bytes and when reflecting them back (`crate::reflect`).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum Tag {
    Array = 0x01,
    Object = 0x02,
    Str = 0x03,
    U8Array = 0x04,
    Buffer = 0x05,
    Promise = 0x06,
    Iterator = 0x07,
    Boolean = 0x08,
    Uint8 = 0x09,
    Uint = 0x0A,
    Union = 0x0B,
    Date = 0x0C,
    Int = 0x0D,
    Float = 0x0E,
    Nullable = 0x0F,
    Optional = 0x10,
    BigInt = 0x11,
    ReadableStream = 0x12,
    Record = 0x13,
    Map = 0x14,
    PotentiallyFloatString = 0x15,
    Any = 0x16,
    CompressionTable = 0x17,
}

impl Tag {
    pub fn from_byte(b: u8) -> Option<Tag> {
        Some(match b {
            0x01 => Tag::Array,
            0x02 => Tag::Object,
            0x03 => Tag::Str,
            0x04 => Tag::U8Array,
            0x05 => Tag::Buffer,
            0x06 => Tag::Promise,
            0x07 => Tag::Iterator,
            0x08 => Tag::Boolean,
            0x09 => Tag::Uint8,
            0x0A => Tag::Uint,
            0x0B => Tag::Union,
            0x0C => Tag::Date,
            0x0D => Tag::Int,
            0x0E => Tag::Float,
            0x0F => Tag::Nullable,
            0x10 => Tag::Optional,
            0x11 => Tag::BigInt,
            0x12 => Tag::ReadableStream,
            0x13 => Tag::Record,
            0x14 => Tag::Map,
            0x15 => Tag::PotentiallyFloatString,
            0x16 => Tag::Any,
            0x17 => Tag::CompressionTable,
            _ => return None,
        })
    }
}

/// A field of an `object` schema. Declaration order is irrelevant — wire
/// order is always the lexicographic sort of `name` (§3 invariants).
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectField {
    pub name: String,
    pub schema: Schema,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Array(Box<Schema>),
    Object(Vec<ObjectField>),
    Str,
    U8Array,
    Buffer,
    Promise(Box<Schema>),
    Iterator(Box<Schema>),
    Boolean,
    Uint8,
    Uint,
    /// Alternatives are ordered; first-match wins both for validation and
    /// for the discriminator written on the wire (§3, §4.4).
    Union(Vec<Schema>),
    Date,
    Int,
    Float,
    BigInt,
    /// `None` is the "naked" nullable: legal only as `Value::Null`, encoded
    /// as a single `0x00` byte with no child schema in the bytes.
    Nullable(Option<Box<Schema>>),
    Optional(Box<Schema>),
    ReadableStream,
    Record(Box<Schema>),
    Map(Box<Schema>, Box<Schema>),
    /// Reflection-only in practice (§9 Open Questions) — exposed so the
    /// reflector can round-trip it, not meant to be reached for directly.
    PotentiallyFloatString,
    Any,
    CompressionTable(Box<Schema>, bool),
}

impl Schema {
    pub fn array(inner: Schema) -> Schema {
        Schema::Array(Box::new(inner))
    }

    /// Builds an `object` schema, sorting fields lexicographically by key
    /// so that declaration order never leaks onto the wire.
    pub fn object(mut fields: Vec<ObjectField>) -> Schema {
        fields.sort_by(|a, b| a.name.cmp(&b.name));
        Schema::Object(fields)
    }

    pub fn promise(inner: Schema) -> Schema {
        Schema::Promise(Box::new(inner))
    }

    pub fn iterator(inner: Schema) -> Schema {
        Schema::Iterator(Box::new(inner))
    }

    /// Builds a `union` schema. Fails if `alternatives` is empty — a union
    /// with no alternatives could never validate any value (§3 invariants).
    pub fn union(alternatives: Vec<Schema>) -> Result<Schema> {
        ensure_non_empty_union(&alternatives)?;
        Ok(Schema::Union(alternatives))
    }

    pub fn nullable(inner: Schema) -> Schema {
        Schema::Nullable(Some(Box::new(inner)))
    }

    pub fn naked_nullable() -> Schema {
        Schema::Nullable(None)
    }

    pub fn optional(inner: Schema) -> Schema {
        Schema::Optional(Box::new(inner))
    }

    pub fn record(value: Schema) -> Schema {
        Schema::Record(Box::new(value))
    }

    pub fn map(key: Schema, value: Schema) -> Schema {
        Schema::Map(Box::new(key), Box::new(value))
    }

    pub fn compression_table(inner: Schema, deep: bool) -> Schema {
        Schema::CompressionTable(Box::new(inner), deep)
    }

    /// Reflection-only constructor (§9 Open Questions, resolved in
    /// `SPEC_FULL.md`): not meant to be reached for when hand-authoring a
    /// schema, but needed so bytes reflected from the wire round-trip.
    pub fn potentially_float_string() -> Schema {
        Schema::PotentiallyFloatString
    }

    /// Transparent wrapper (§4.4 `pipe(T, f)`): the schema bytes are those
    /// of `T`, and the transform `f` is applied purely at the value layer
    /// before writing. There is nothing to represent on the wire, so this
    /// returns `T` unchanged — callers apply `f` themselves to produce the
    /// `Value` they hand to `encode_session`, the same way they would for
    /// any other derived value; there's no separate wrapper type to carry
    /// `f` through the schema algebra.
    pub fn pipe(inner: Schema) -> Schema {
        inner
    }

    pub fn tag(&self) -> Tag {
        match self {
            Schema::Array(_) => Tag::Array,
            Schema::Object(_) => Tag::Object,
            Schema::Str => Tag::Str,
            Schema::U8Array => Tag::U8Array,
            Schema::Buffer => Tag::Buffer,
            Schema::Promise(_) => Tag::Promise,
            Schema::Iterator(_) => Tag::Iterator,
            Schema::Boolean => Tag::Boolean,
            Schema::Uint8 => Tag::Uint8,
            Schema::Uint => Tag::Uint,
            Schema::Union(_) => Tag::Union,
            Schema::Date => Tag::Date,
            Schema::Int => Tag::Int,
            Schema::Float => Tag::Float,
            Schema::Nullable(_) => Tag::Nullable,
            Schema::Optional(_) => Tag::Optional,
            Schema::BigInt => Tag::BigInt,
            Schema::ReadableStream => Tag::ReadableStream,
            Schema::Record(_) => Tag::Record,
            Schema::Map(..) => Tag::Map,
            Schema::PotentiallyFloatString => Tag::PotentiallyFloatString,
            Schema::Any => Tag::Any,
            Schema::CompressionTable(..) => Tag::CompressionTable,
        }
    }

    /// Whether this schema's value tree can contain streaming nodes
    /// (promise/iterator/readable-stream) anywhere beneath it. Used by the
    /// planner to decide whether a value needs the multiplexer at all.
    pub fn may_stream(&self) -> bool {
        match self {
            Schema::Promise(_) | Schema::Iterator(_) | Schema::ReadableStream => true,
            Schema::Array(inner) | Schema::Optional(inner) | Schema::Record(inner) => inner.may_stream(),
            Schema::Nullable(Some(inner)) => inner.may_stream(),
            Schema::Nullable(None) => false,
            Schema::Object(fields) => fields.iter().any(|f| f.schema.may_stream()),
            Schema::Union(alts) => alts.iter().any(Schema::may_stream),
            Schema::Map(k, v) => k.may_stream() || v.may_stream(),
            Schema::CompressionTable(inner, _) => inner.may_stream(),
            // `any`'s contents are unknown until encode time; conservatively
            // true so the planner always registers a multiplexer.
            Schema::Any => true,
            _ => false,
        }
    }

    /// Writes the canonical byte-representation (§6) to `w`.
    pub fn write_bytes<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&[self.tag() as u8])?;
        match self {
            Schema::Array(inner) => inner.write_bytes(w)?,
            Schema::Object(fields) => {
                varint::write_uint(w, fields.len() as u64)?;
                for field in fields {
                    let name_bytes = field.name.as_bytes();
                    varint::write_uint(w, name_bytes.len() as u64)?;
                    w.write_all(name_bytes)?;
                    field.schema.write_bytes(w)?;
                }
            }
            Schema::Str | Schema::U8Array | Schema::Buffer | Schema::Boolean | Schema::Uint8
            | Schema::Uint | Schema::Date | Schema::Int | Schema::Float | Schema::BigInt
            | Schema::ReadableStream | Schema::PotentiallyFloatString | Schema::Any => {}
            Schema::Promise(inner) | Schema::Iterator(inner) => inner.write_bytes(w)?,
            Schema::Union(alts) => {
                debug_assert!(!alts.is_empty(), "union schema built outside Schema::union");
                varint::write_uint(w, alts.len().saturating_sub(1) as u64)?;
                for alt in alts {
                    alt.write_bytes(w)?;
                }
            }
            Schema::Nullable(None) => w.write_all(&[0x00])?,
            Schema::Nullable(Some(inner)) => inner.write_bytes(w)?,
            Schema::Optional(inner) => inner.write_bytes(w)?,
            Schema::Record(inner) => inner.write_bytes(w)?,
            Schema::Map(key, value) => {
                key.write_bytes(w)?;
                value.write_bytes(w)?;
            }
            Schema::CompressionTable(inner, _deep) => inner.write_bytes(w)?,
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // write_bytes over a Vec<u8> never fails.
        self.write_bytes(&mut buf).expect("writing to Vec<u8> is infallible");
        buf
    }

    /// A stable digest of the schema bytes (§6 "Schema digest"). Any
    /// collision-resistant digest is acceptable per the spec; this crate
    /// uses SHA-256, the same choice `binschema::Schema::sha256` makes.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.to_bytes());
        hasher.finalize().into()
    }
}

fn ensure_non_empty_union(alts: &[Schema]) -> Result<()> {
    if alts.is_empty() {
        bail!(Validation, "union schema must have at least one alternative");
    }
    Ok(())
}
