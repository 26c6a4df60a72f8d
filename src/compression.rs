//! The per-session compression table scratchpad (§4.4 `compression-table`).
//!
//! Entries are deduplicated by a digest of their canonical byte form, the
//! same content-addressing idea `Schema::digest` uses one layer up. The
//! source implementation distinguishes identity-based dedup (two references
//! to the exact same object) from deep/structural dedup; this crate only
//! has an owned `Value` tree with no stable object identity to key on, so
//! both collapse to structural-equality dedup here (see DESIGN.md).

use std::collections::HashMap;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::value::Value;

pub struct CompressionTable {
    seen: Mutex<HashMap<[u8; 32], u64>>,
    next_index: Mutex<u64>,
}

impl CompressionTable {
    pub fn new() -> Self {
        CompressionTable { seen: Mutex::new(HashMap::new()), next_index: Mutex::new(0) }
    }

    /// Looks up `digest`, assigning a fresh index if this is the first time
    /// it's been seen this session. Returns `(index, is_new)` — `is_new`
    /// tells the caller whether to inline the full value alongside the
    /// index or just write a back-reference.
    pub fn lookup_or_insert(&self, digest: [u8; 32]) -> (u64, bool) {
        let mut seen = self.seen.lock().unwrap();
        if let Some(&idx) = seen.get(&digest) {
            return (idx, false);
        }
        let mut next = self.next_index.lock().unwrap();
        let idx = *next;
        *next += 1;
        seen.insert(digest, idx);
        (idx, true)
    }
}

impl Default for CompressionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A canonical, schema-independent byte rendering of a value, used only to
/// compute the dedup digest — not part of the wire format. Object/record
/// keys are written in sorted order (already guaranteed for `Object` by
/// `BTreeMap`); streaming leaves have no stable content to canonicalize, so
/// they're treated as always-unique (never deduplicated).
pub fn canonical_digest(value: &Value) -> [u8; 32] {
    let mut buf = Vec::new();
    canonicalize_into(value, &mut buf);
    let mut hasher = Sha256::new();
    hasher.update(&buf);
    hasher.finalize().into()
}

fn canonicalize_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(0),
        Value::Absent => out.push(1),
        Value::Boolean(b) => {
            out.push(2);
            out.push(*b as u8);
        }
        Value::Uint8(v) => {
            out.push(3);
            out.push(*v);
        }
        Value::Uint(v) => {
            out.push(4);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Int(v) => {
            out.push(5);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Float(v) => {
            out.push(6);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::BigInt(v) => {
            out.push(7);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Str(s) => {
            out.push(8);
            out.extend_from_slice(&(s.len() as u64).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            out.push(9);
            out.extend_from_slice(&(b.len() as u64).to_le_bytes());
            out.extend_from_slice(b);
        }
        Value::Date(v) => {
            out.push(10);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Array(items) => {
            out.push(11);
            out.extend_from_slice(&(items.len() as u64).to_le_bytes());
            for item in items {
                canonicalize_into(item, out);
            }
        }
        Value::Object(map) | Value::Record(map) => {
            out.push(12);
            out.extend_from_slice(&(map.len() as u64).to_le_bytes());
            for (k, v) in map {
                out.extend_from_slice(&(k.len() as u64).to_le_bytes());
                out.extend_from_slice(k.as_bytes());
                canonicalize_into(v, out);
            }
        }
        Value::Map(entries) => {
            out.push(13);
            out.extend_from_slice(&(entries.len() as u64).to_le_bytes());
            for (k, v) in entries {
                canonicalize_into(k, out);
                canonicalize_into(v, out);
            }
        }
        // Streaming leaves carry no inspectable content without consuming
        // their producer; a process-unique tag keeps them out of the
        // dedup table entirely rather than colliding with each other.
        Value::Promise(p) => {
            out.push(14);
            out.extend_from_slice(&(p as *const _ as usize).to_le_bytes());
        }
        Value::Iterator(h) => {
            out.push(15);
            out.extend_from_slice(&(h as *const _ as usize).to_le_bytes());
        }
        Value::ReadableStream(h) => {
            out.push(16);
            out.extend_from_slice(&(h as *const _ as usize).to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_share_a_digest() {
        let a = Value::Array(vec![Value::Uint(1), Value::Str("x".into())]);
        let b = Value::Array(vec![Value::Uint(1), Value::Str("x".into())]);
        assert_eq!(canonical_digest(&a), canonical_digest(&b));
    }

    #[test]
    fn table_reuses_index_for_repeat_digest() {
        let table = CompressionTable::new();
        let digest = canonical_digest(&Value::Uint(42));
        let (idx1, is_new1) = table.lookup_or_insert(digest);
        let (idx2, is_new2) = table.lookup_or_insert(digest);
        assert!(is_new1);
        assert!(!is_new2);
        assert_eq!(idx1, idx2);
    }
}
