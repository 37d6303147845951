//! Timestamp normalization.
//!
//! The backend is not consistent about timestamps: the list endpoint returns
//! RFC 3339 strings, message payloads sometimes carry epoch seconds or epoch
//! milliseconds, and older records use a bare `YYYY-MM-DD HH:MM:SS` form. All of
//! them are normalized to [`DateTime<Utc>`] at decode time so the store only
//! ever compares one representation.
//!
//! # Rules
//!
//! - RFC 3339 strings keep their instant, converted to UTC
//! - `YYYY-MM-DD HH:MM:SS` (optionally with fractional seconds) is UTC
//! - Numbers (integer, fractional, or numeric strings) with magnitude >= 10^12
//!   are milliseconds, otherwise seconds; fractions are kept to the
//!   millisecond

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::errors::{ProtocolError, Result};

/// Epoch values at or above this magnitude are interpreted as milliseconds.
pub const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Timestamp as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// Integer epoch value (seconds or milliseconds).
    Integer(i64),
    /// Fractional epoch value (seconds or milliseconds).
    Float(f64),
    /// Textual timestamp.
    Text(String),
}

/// Normalize a raw wire timestamp to UTC.
pub fn normalize(raw: &RawTimestamp) -> Result<DateTime<Utc>> {
    match raw {
        RawTimestamp::Integer(value) => from_epoch(*value),
        RawTimestamp::Float(value) => from_epoch_f64(*value),
        RawTimestamp::Text(text) => parse_text(text),
    }
}

/// Parse a textual timestamp.
pub fn parse_text(text: &str) -> Result<DateTime<Utc>> {
    let trimmed = text.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }

    if let Ok(value) = trimmed.parse::<i64>() {
        return from_epoch(value);
    }

    if let Ok(value) = trimmed.parse::<f64>() {
        return from_epoch_f64(value);
    }

    Err(ProtocolError::Timestamp(format!("unrecognized format: {trimmed:?}")))
}

/// Interpret an integer epoch value, choosing seconds or milliseconds by
/// magnitude.
pub fn from_epoch(value: i64) -> Result<DateTime<Utc>> {
    let parsed = if value.unsigned_abs() >= MILLIS_THRESHOLD.unsigned_abs() {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    };

    parsed.ok_or_else(|| ProtocolError::Timestamp(format!("epoch value out of range: {value}")))
}

#[allow(clippy::cast_precision_loss)]
fn from_epoch_f64(value: f64) -> Result<DateTime<Utc>> {
    if !value.is_finite() {
        return Err(ProtocolError::Timestamp(format!("non-finite epoch value: {value}")));
    }

    let millis = if value.abs() >= MILLIS_THRESHOLD as f64 { value } else { value * 1000.0 };
    let millis = millis.round();
    if millis.abs() >= i64::MAX as f64 {
        return Err(ProtocolError::Timestamp(format!("epoch value out of range: {value}")));
    }

    DateTime::from_timestamp_millis(millis as i64)
        .ok_or_else(|| ProtocolError::Timestamp(format!("epoch value out of range: {value}")))
}

/// Serde adapter for required timestamp fields.
pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = RawTimestamp::deserialize(deserializer)?;
    normalize(&raw).map_err(serde::de::Error::custom)
}

/// Serde adapter for optional timestamp fields. `null` and absent fields map to
/// `None`.
pub fn deserialize_opt<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawTimestamp>::deserialize(deserializer)?;
    raw.as_ref().map(normalize).transpose().map_err(serde::de::Error::custom)
}
