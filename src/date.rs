//! `date` is encoded on the wire as a `string` (§4.4), so this module only
//! has to bridge this crate's internal `i64` millis-since-epoch
//! representation to and from ISO-8601 text. None of the five teacher/pack
//! repos needs wall-clock dates on their wire formats, so this reaches into
//! the broader retrieval pack: `logannye-tinyzkp` depends on `chrono` for
//! exactly this (timestamping proof records), so this crate borrows the
//! same dependency rather than hand-rolling a calendar.
//!
//! §9 notes the source implementation "loses any tracking of the original
//! time zone beyond offset normalization to UTC" — this module preserves
//! that: round-tripping always yields UTC, never the zone the string was
//! written in.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::error::{bail, Result};

/// Formats `millis` (since the Unix epoch, UTC) as the ISO-8601 string
/// written for a `date` value.
pub fn format_millis(millis: i64) -> String {
    let dt = match Utc.timestamp_millis_opt(millis) {
        chrono::LocalResult::Single(dt) => dt,
        // Out-of-range millis can't happen for values this crate itself
        // produced, but a reflected/decoded value could carry anything;
        // clamp to the epoch rather than panicking.
        _ => Utc.timestamp_millis_opt(0).single().expect("epoch is always in range"),
    };
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an ISO-8601 string into millis since the Unix epoch, normalizing
/// any offset to UTC (§9).
pub fn parse_millis(s: &str) -> Result<i64> {
    let dt = DateTime::parse_from_rfc3339(s)
        .map_err(|e| crate::error::error!(Validation, "invalid ISO-8601 date string '{s}': {e}"))?;
    Ok(dt.with_timezone(&Utc).timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_iso8601() {
        let millis = 1_700_000_000_123;
        let s = format_millis(millis);
        assert_eq!(parse_millis(&s).unwrap(), millis);
    }

    #[test]
    fn normalizes_offset_to_utc() {
        let millis = parse_millis("2024-01-01T12:00:00+02:00").unwrap();
        let utc = parse_millis("2024-01-01T10:00:00Z").unwrap();
        assert_eq!(millis, utc);
    }

    #[test]
    fn rejects_malformed_string() {
        assert!(parse_millis("not a date").is_err());
    }
}
