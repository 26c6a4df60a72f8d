//! The "rolling uint" variable-length integer codec (§4.1) and its
//! zigzag-signed wrapper.
//!
//! Canonical form: the smallest of four lead-byte-keyed encodings that fits
//! the value. Unlike a LEB128-style scheme, the byte count is a function of
//! magnitude bucket, not of the number of 7-bit groups, so `size()` is O(1).

use std::io::{Error, ErrorKind, Read, Result, Write};

const LEAD_U16: u8 = 0xFD;
const LEAD_U32: u8 = 0xFE;
const LEAD_U64: u8 = 0xFF;

/// Number of bytes `write_uint` will emit for `v`.
pub fn size(v: u64) -> usize {
    if v < LEAD_U16 as u64 {
        1
    } else if v <= u16::MAX as u64 {
        3
    } else if v <= u32::MAX as u64 {
        5
    } else {
        9
    }
}

/// Write a non-negative integer using the shortest of the four canonical
/// forms. Never produces a non-canonical encoding (§3 invariants).
pub fn write_uint<W: Write>(w: &mut W, v: u64) -> Result<()> {
    if v < LEAD_U16 as u64 {
        w.write_all(&[v as u8])
    } else if v <= u16::MAX as u64 {
        w.write_all(&[LEAD_U16])?;
        w.write_all(&(v as u16).to_le_bytes())
    } else if v <= u32::MAX as u64 {
        w.write_all(&[LEAD_U32])?;
        w.write_all(&(v as u32).to_le_bytes())
    } else {
        w.write_all(&[LEAD_U64])?;
        w.write_all(&v.to_le_bytes())
    }
}

/// Read a rolling uint. Non-canonical encodings (e.g. a value < 0xFD written
/// with the `0xFD` prefix) are accepted for robustness, per §4.1.
pub fn read_uint<R: Read>(r: &mut R) -> Result<u64> {
    let mut lead = [0u8; 1];
    r.read_exact(&mut lead)?;
    match lead[0] {
        LEAD_U16 => {
            let mut buf = [0u8; 2];
            r.read_exact(&mut buf)?;
            Ok(u16::from_le_bytes(buf) as u64)
        }
        LEAD_U32 => {
            let mut buf = [0u8; 4];
            r.read_exact(&mut buf)?;
            Ok(u32::from_le_bytes(buf) as u64)
        }
        LEAD_U64 => {
            let mut buf = [0u8; 8];
            r.read_exact(&mut buf)?;
            Ok(u64::from_le_bytes(buf))
        }
        b => Ok(b as u64),
    }
}

/// Read a rolling uint from an in-memory byte slice, advancing it. Used in
/// contexts (schema-bytes reflection, compression-table indices from an
/// already-buffered frame) where a full `Read` is unnecessary ceremony.
pub fn read_uint_slice(buf: &[u8]) -> Result<(u64, &[u8])> {
    if buf.is_empty() {
        return Err(Error::new(ErrorKind::UnexpectedEof, "rolling uint: no lead byte"));
    }
    let lead = buf[0];
    let rest = &buf[1..];
    match lead {
        LEAD_U16 => {
            if rest.len() < 2 {
                return Err(Error::new(ErrorKind::UnexpectedEof, "rolling uint: truncated u16"));
            }
            let v = u16::from_le_bytes([rest[0], rest[1]]);
            Ok((v as u64, &rest[2..]))
        }
        LEAD_U32 => {
            if rest.len() < 4 {
                return Err(Error::new(ErrorKind::UnexpectedEof, "rolling uint: truncated u32"));
            }
            let v = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            Ok((v as u64, &rest[4..]))
        }
        LEAD_U64 => {
            if rest.len() < 8 {
                return Err(Error::new(ErrorKind::UnexpectedEof, "rolling uint: truncated u64"));
            }
            let mut b = [0u8; 8];
            b.copy_from_slice(&rest[..8]);
            Ok((u64::from_le_bytes(b), &rest[8..]))
        }
        b => Ok((b as u64, rest)),
    }
}

/// Zigzag-encode a signed integer. The source implementation this spec is
/// distilled from does this arithmetic at 32-bit width; that quirk is
/// preserved deliberately (§9) — very large negative magnitudes (|v| >=
/// 2^31) round-trip incorrectly. Do not "fix" this.
pub fn zigzag_encode(v: i64) -> u64 {
    let v32 = v as i32;
    (((v32 << 1) ^ (v32 >> 31)) as u32) as u64
}

/// Inverse of [`zigzag_encode`], same 32-bit width quirk preserved.
pub fn zigzag_decode(z: u64) -> i64 {
    let z32 = z as u32;
    (((z32 >> 1) as i32) ^ -((z32 & 1) as i32)) as i64
}

pub fn write_sint<W: Write>(w: &mut W, v: i64) -> Result<()> {
    write_uint(w, zigzag_encode(v))
}

pub fn read_sint<R: Read>(r: &mut R) -> Result<i64> {
    Ok(zigzag_decode(read_uint(r)?))
}

/// Async counterpart of [`read_uint`], reading directly off the transport
/// rather than an in-memory buffer — used by `crate::session` for the
/// session header's length prefixes and the multiplexer's frame headers
/// (§4.3's chunked-async-read requirement, narrowed to exactly the varint
/// grammar rather than a general `read_byte`/`peek_byte`/`read_n` surface;
/// see DESIGN.md).
pub async fn read_uint_async<R>(r: &mut R) -> crate::error::Result<u64>
where
    R: tokio::io::AsyncReadExt + Unpin,
{
    let lead = r.read_u8().await?;
    Ok(match lead {
        LEAD_U16 => r.read_u16_le().await? as u64,
        LEAD_U32 => r.read_u32_le().await? as u64,
        LEAD_U64 => r.read_u64_le().await?,
        b => b as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_by_size() {
        for &(v, expect_len) in &[(0u64, 1), (252, 1), (253, 3), (0xFFFF, 3), (0x10000, 5), (u32::MAX as u64, 5), (u32::MAX as u64 + 1, 9), (u64::MAX, 9)] {
            assert_eq!(size(v), expect_len, "size({v})");
            let mut buf = Vec::new();
            write_uint(&mut buf, v).unwrap();
            assert_eq!(buf.len(), expect_len, "encoded length of {v}");
            let got = read_uint(&mut buf.as_slice()).unwrap();
            assert_eq!(got, v);
        }
    }

    #[test]
    fn concrete_spec_bytes() {
        let mut buf = Vec::new();
        write_uint(&mut buf, 0).unwrap();
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        write_uint(&mut buf, 252).unwrap();
        assert_eq!(buf, vec![0xFC]);

        buf.clear();
        write_uint(&mut buf, 253).unwrap();
        assert_eq!(buf, vec![0xFD, 0xFD, 0x00]);
    }

    #[test]
    fn non_canonical_decode_is_accepted() {
        // 5 written with the 0xFD prefix form is non-canonical but must
        // still decode, per §4.1's "accepted on decode for robustness".
        let buf = [0xFD, 0x05, 0x00];
        let got = read_uint(&mut buf.as_slice()).unwrap();
        assert_eq!(got, 5);
    }

    #[test]
    fn zigzag_round_trips_within_32_bits() {
        for v in [-1i64, 0, 1, -2, 2, i32::MAX as i64, i32::MIN as i64] {
            let z = zigzag_encode(v);
            assert_eq!(zigzag_decode(z), v, "zigzag round trip for {v}");
        }
    }

    #[test]
    fn read_uint_slice_matches_streaming_reader() {
        for v in [0u64, 252, 253, 70000, u64::MAX] {
            let mut buf = Vec::new();
            write_uint(&mut buf, v).unwrap();
            let (got, rest) = read_uint_slice(&buf).unwrap();
            assert_eq!(got, v);
            assert!(rest.is_empty());
        }
    }
}
