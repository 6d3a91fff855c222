//! Conversions between model values and SQLite columns.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;

use parley_shared::{Entity, Property};

use crate::error::Result;

/// Fixed-width RFC 3339 so that text ordering in SQL matches time ordering.
pub(crate) fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn decode_entity(idx: usize, s: &str) -> rusqlite::Result<Entity> {
    Entity::parse(s).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn encode_properties(properties: &[Property]) -> Result<String> {
    Ok(serde_json::to_string(properties)?)
}

pub(crate) fn decode_properties(idx: usize, s: &str) -> rusqlite::Result<Vec<Property>> {
    serde_json::from_str(s).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
