//! Schema validation: checking a `Value` conforms to a `Schema` before any
//! byte is written (§4.3). Validation failures are always `ErrorKind::Validation`
//! and never leave partial output — this module only ever reads.

use crate::error::{bail, ensure, Result};
use crate::schema::Schema;
use crate::value::Value;

/// Validates `value` against `schema`, recursing into composite schemas.
/// Streaming leaves (`Promise`/`Iterator`/`ReadableStream`) are validated
/// shallowly — their item schema is checked only as items actually arrive,
/// since checking eagerly would mean consuming the stream before emit.
pub fn validate(schema: &Schema, value: &Value) -> Result<()> {
    match (schema, value) {
        (Schema::Nullable(_), Value::Null) => Ok(()),
        (Schema::Nullable(None), other) => {
            bail!(Validation, "naked nullable schema only accepts null, got {}", other.kind_name())
        }
        (Schema::Nullable(Some(inner)), other) => validate(inner, other),

        (Schema::Optional(_), Value::Absent) => Ok(()),
        (Schema::Optional(inner), other) => validate(inner, other),

        // An absent/null value against anything else is always a mismatch;
        // report this before the generic arms below so the message names
        // the sentinel explicitly.
        (_, Value::Absent) => bail!(Validation, "value absent but schema {:?} requires a value", schema.tag()),
        (_, Value::Null) => bail!(Validation, "value null but schema {:?} is not nullable", schema.tag()),

        (Schema::Boolean, Value::Boolean(_)) => Ok(()),
        (Schema::Uint8, Value::Uint8(_)) => Ok(()),
        (Schema::Uint, Value::Uint(_)) => Ok(()),
        (Schema::Int, Value::Int(_)) => Ok(()),
        // Any f64 validates, including NaN and ±infinity (§3, §4.4) — the
        // little-endian write at `crate::encode` preserves the bit pattern
        // as-is, so NaN/±inf round-trip per §8.
        (Schema::Float, Value::Float(_)) => Ok(()),
        (Schema::BigInt, Value::BigInt(v)) => {
            ensure!((0..=u64::MAX as i128).contains(v), Validation, "bigint value {v} out of 0..=2^64-1 range");
            Ok(())
        }
        (Schema::Str, Value::Str(_)) => Ok(()),
        (Schema::PotentiallyFloatString, Value::Str(_)) => Ok(()),
        (Schema::U8Array, Value::Bytes(_)) => Ok(()),
        (Schema::Buffer, Value::Bytes(_)) => Ok(()),
        (Schema::Date, Value::Date(_)) => Ok(()),
        (Schema::Promise(_), Value::Promise(_)) => Ok(()),
        (Schema::Iterator(_), Value::Iterator(_)) => Ok(()),
        (Schema::ReadableStream, Value::ReadableStream(_)) => Ok(()),
        (Schema::Any, _) => Ok(()),

        (Schema::Array(inner), Value::Array(items)) => {
            for item in items {
                validate(inner, item)?;
            }
            Ok(())
        }

        (Schema::Object(fields), Value::Object(map)) => {
            for field in fields {
                match map.get(&field.name) {
                    Some(v) => validate(&field.schema, v)?,
                    None => {
                        // A missing key is only legal if the field schema is
                        // itself optional — treat it as an implicit Absent.
                        validate(&field.schema, &Value::Absent)?;
                    }
                }
            }
            for key in map.keys() {
                ensure!(
                    fields.iter().any(|f| &f.name == key),
                    Validation,
                    "object value has field '{key}' not present in schema"
                );
            }
            Ok(())
        }

        (Schema::Record(inner), Value::Record(map)) => {
            for v in map.values() {
                validate(inner, v)?;
            }
            Ok(())
        }

        (Schema::Map(key_schema, value_schema), Value::Map(entries)) => {
            for (k, v) in entries {
                validate(key_schema, k)?;
                validate(value_schema, v)?;
            }
            Ok(())
        }

        (Schema::Union(alts), other) => {
            for alt in alts {
                if validate(alt, other).is_ok() {
                    return Ok(());
                }
            }
            bail!(Validation, "value of kind '{}' matched no union alternative", other.kind_name())
        }

        (Schema::CompressionTable(inner, _), other) => validate(inner, other),

        (schema, other) => {
            tracing::debug!(kind = other.kind_name(), schema = ?schema.tag(), "validation failed");
            bail!(Validation, "value of kind '{}' does not conform to schema {:?}", other.kind_name(), schema.tag())
        }
    }
}

/// Picks the index of the first union alternative `value` validates
/// against. Used both by validation and by the encoder, which must write
/// the same index it validated against (§4.4).
pub fn union_alternative_index(alts: &[Schema], value: &Value) -> Result<usize> {
    for (i, alt) in alts.iter().enumerate() {
        if validate(alt, value).is_ok() {
            return Ok(i);
        }
    }
    bail!(Validation, "value of kind '{}' matched no union alternative", value.kind_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ObjectField;
    use bytes::Bytes;

    #[test]
    fn scalars_round_trip_validation() {
        assert!(validate(&Schema::Boolean, &Value::Boolean(true)).is_ok());
        assert!(validate(&Schema::Uint, &Value::Uint(5)).is_ok());
        assert!(validate(&Schema::Uint, &Value::Int(5)).is_err());
    }

    #[test]
    fn nullable_accepts_null_and_inner() {
        let schema = Schema::nullable(Schema::Uint);
        assert!(validate(&schema, &Value::Null).is_ok());
        assert!(validate(&schema, &Value::Uint(1)).is_ok());
        assert!(validate(&schema, &Value::Boolean(true)).is_err());
    }

    #[test]
    fn naked_nullable_rejects_non_null() {
        let schema = Schema::naked_nullable();
        assert!(validate(&schema, &Value::Null).is_ok());
        assert!(validate(&schema, &Value::Uint(1)).is_err());
    }

    #[test]
    fn optional_field_may_be_missing() {
        let schema = Schema::object(vec![ObjectField { name: "x".into(), schema: Schema::optional(Schema::Uint) }]);
        let mut map = std::collections::BTreeMap::new();
        assert!(validate(&schema, &Value::Object(map.clone())).is_ok());
        map.insert("x".into(), Value::Uint(3));
        assert!(validate(&schema, &Value::Object(map)).is_ok());
    }

    #[test]
    fn object_rejects_unknown_field() {
        let schema = Schema::object(vec![ObjectField { name: "x".into(), schema: Schema::Uint }]);
        let mut map = std::collections::BTreeMap::new();
        map.insert("x".into(), Value::Uint(1));
        map.insert("y".into(), Value::Uint(2));
        assert!(validate(&schema, &Value::Object(map)).is_err());
    }

    #[test]
    fn union_picks_first_matching_alternative() {
        let schema = Schema::union(vec![Schema::Uint, Schema::Str]).unwrap();
        assert_eq!(union_alternative_index(
            match &schema { Schema::Union(alts) => alts, _ => unreachable!() },
            &Value::Str("hi".into())
        ).unwrap(), 1);
    }

    #[test]
    fn buffer_and_u8_array_both_accept_bytes() {
        let bytes = Value::Bytes(Bytes::from_static(b"abc"));
        assert!(validate(&Schema::Buffer, &bytes).is_ok());
        assert!(validate(&Schema::U8Array, &bytes).is_ok());
    }
}
