//! Fixed-width UTC timestamps.
//!
//! Documents keep times as `2024-05-01T10:00:00.000+00:00` strings. Every value
//! is normalized to UTC with millisecond precision so lexical order equals
//! chronological order, which both backends rely on for range filters and sorts.

use serde::{Deserialize, Deserializer, Serializer};
use time::{
    format_description::{well_known::Rfc3339, FormatItem},
    macros::format_description,
    OffsetDateTime, UtcOffset,
};

const FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3][offset_hour sign:mandatory]:[offset_minute]"
);

pub fn format(at: OffsetDateTime) -> String {
    at.to_offset(UtcOffset::UTC)
        .format(&FORMAT)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Accepts any RFC 3339 string and returns its canonical stored form.
pub fn normalize(raw: &str) -> Option<String> {
    OffsetDateTime::parse(raw, &Rfc3339).ok().map(format)
}

pub fn parse(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

pub fn serialize<S: Serializer>(at: &OffsetDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format(*at))
}

pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<OffsetDateTime, D::Error> {
    let raw = String::deserialize(d)?;
    parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {raw}")))
}

pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(at: &Option<OffsetDateTime>, s: S) -> Result<S::Ok, S::Error> {
        match at {
            Some(at) => s.serialize_some(&format(*at)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<OffsetDateTime>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {raw}"))),
            None => Ok(None),
        }
    }
}
