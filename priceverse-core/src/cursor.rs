//! Keyset pagination cursors
//!
//! A cursor is the base64 of a boundary row's period-start in ISO-8601.
//! Opaque to clients; decoding failures are validation errors, not panics.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult};

/// Encode a period-start as an opaque cursor
pub fn encode_cursor(period_start: DateTime<Utc>) -> String {
    BASE64.encode(period_start.to_rfc3339())
}

/// Decode a cursor back to its period-start
pub fn decode_cursor(cursor: &str) -> CoreResult<DateTime<Utc>> {
    let bytes = BASE64
        .decode(cursor)
        .map_err(|_| CoreError::invalid_params("malformed cursor"))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| CoreError::invalid_params("malformed cursor"))?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| CoreError::invalid_params("malformed cursor"))
}
