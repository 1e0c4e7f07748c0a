//! Fixed round-trip date format shared by every backend and wire format.
//!
//! Dates are written as `YYYY-MM-DDTHH:MM:SS.fffffffZ` (UTC, seven
//! fractional digits). Any RFC 3339 value is accepted on input, as is a
//! zone-less timestamp, which is taken to be UTC.
//!
//! ```
//! use chrono::{DateTime, Utc};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Order {
//!     #[serde(with = "pagewise_transport::dates::round_trip")]
//!     placed_at: DateTime<Utc>,
//! }
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};

/// Formats a UTC timestamp with seven fractional digits.
pub fn format_round_trip(value: &DateTime<Utc>) -> String {
    let ticks = (value.timestamp_subsec_nanos() / 100).min(9_999_999);
    format!("{}.{:07}Z", value.format("%Y-%m-%dT%H:%M:%S"), ticks)
}

/// Parses an RFC 3339 timestamp (or a zone-less one, read as UTC).
pub fn parse_round_trip(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let value = value.trim();
    match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(rfc_err) => NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|_| rfc_err),
    }
}

/// Serde adapter for `DateTime<Utc>` fields.
pub mod round_trip {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_round_trip(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_round_trip(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<DateTime<Utc>>` fields.
pub mod round_trip_option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_some(&super::format_round_trip(dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) if !raw.trim().is_empty() => super::parse_round_trip(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
