//! Normalization of raw channel payloads into typed records.
//!
//! Both channels deliver loosely-typed JSON. This module turns that JSON into
//! [`AlertRecord`]s and [`StatusSnapshot`]s. Malformed individual records are
//! dropped and logged; only a payload of the wrong overall shape is an error.
//!
//! | Payload | Shape | Function |
//! |---------|-------|----------|
//! | push `alerts` topic | object keyed by record id | [`normalize_alert_map`] |
//! | pull `alerts` field | array of records with `id` | [`normalize_alert_list`] |
//! | `status` (both) | single object | [`parse_status`] |

use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

use crate::error::{ParseError, ParseResult};
use crate::log::merge;
use crate::types::{AlertKind, AlertRecord, FatigueLevel, HelmetState, Location, Severity, StatusSnapshot};

/// Result of normalizing an alert payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertBatch {
    /// Valid records, newest-first, capped at the log capacity.
    pub records: Vec<AlertRecord>,
    /// Number of records dropped as malformed.
    pub dropped: usize,
}

/// Parse a wire timestamp: an RFC 3339 string, or Unix milliseconds given as
/// a number or numeric string.
///
/// ```
/// use helmwatch_types::wire::parse_timestamp;
/// use serde_json::json;
///
/// let a = parse_timestamp(&json!("2025-03-01T12:00:00Z")).unwrap();
/// let b = parse_timestamp(&json!(1740830400000_i64)).unwrap();
/// assert_eq!(a, b);
/// ```
pub fn parse_timestamp(value: &Value) -> ParseResult<OffsetDateTime> {
    match value {
        Value::String(s) => OffsetDateTime::parse(s, &Rfc3339).or_else(|_| {
            s.trim()
                .parse::<i64>()
                .map_err(|_| ParseError::InvalidTimestamp(s.clone()))
                .and_then(from_unix_millis)
        }),
        Value::Number(n) => match n.as_i64() {
            Some(ms) => from_unix_millis(ms),
            // Fractional milliseconds are truncated.
            None => n
                .as_f64()
                .filter(|ms| ms.is_finite())
                .map(|ms| ms as i64)
                .ok_or_else(|| ParseError::InvalidTimestamp(n.to_string()))
                .and_then(from_unix_millis),
        },
        other => Err(ParseError::InvalidTimestamp(other.to_string())),
    }
}

fn from_unix_millis(ms: i64) -> ParseResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|_| ParseError::InvalidTimestamp(ms.to_string()))
}

/// Parse one alert record. `id` overrides any `id` field inside the object.
pub fn parse_alert(id: Option<&str>, value: &Value) -> ParseResult<AlertRecord> {
    let obj = value.as_object().ok_or(ParseError::UnexpectedShape {
        what: "alert record",
        expected: "object",
    })?;

    let id = match id {
        Some(id) => id.to_string(),
        None => match obj.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => return Err(ParseError::invalid("id", other)),
            None => return Err(ParseError::MissingField("id")),
        },
    };

    let timestamp = obj
        .get("timestamp")
        .ok_or(ParseError::MissingField("timestamp"))
        .and_then(parse_timestamp)?;

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .map_or(AlertKind::Other, AlertKind::from_wire);
    let severity = obj
        .get("severity")
        .and_then(Value::as_str)
        .map_or(Severity::Normal, Severity::from_wire);
    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(AlertRecord {
        id,
        kind,
        message,
        severity,
        timestamp,
    })
}

/// Normalize the push channel's `alerts` topic: an object keyed by record
/// identifier. `null` is an empty batch; an array is accepted as a list.
pub fn normalize_alert_map(value: &Value) -> ParseResult<AlertBatch> {
    match value {
        Value::Null => Ok(AlertBatch::default()),
        Value::Object(map) => Ok(collect(
            map.iter().map(|(key, record)| parse_alert(Some(key), record)),
        )),
        Value::Array(_) => normalize_alert_list(value),
        _ => Err(ParseError::UnexpectedShape {
            what: "alerts",
            expected: "object keyed by id",
        }),
    }
}

/// Normalize the pull endpoint's `alerts` field: an array of records that
/// carry their own `id`. `null` is an empty batch.
pub fn normalize_alert_list(value: &Value) -> ParseResult<AlertBatch> {
    match value {
        Value::Null => Ok(AlertBatch::default()),
        Value::Array(items) => Ok(collect(items.iter().map(|record| parse_alert(None, record)))),
        _ => Err(ParseError::UnexpectedShape {
            what: "alerts",
            expected: "array",
        }),
    }
}

fn collect(results: impl Iterator<Item = ParseResult<AlertRecord>>) -> AlertBatch {
    let mut records = Vec::new();
    let mut dropped = 0;
    for result in results {
        match result {
            Ok(record) => records.push(record),
            Err(e) => {
                dropped += 1;
                warn!("Dropping malformed alert record: {}", e);
            }
        }
    }
    AlertBatch {
        records: merge(&[], &records),
        dropped,
    }
}

/// Parse a status object. Missing fields take the initial dashboard defaults;
/// unknown enum values reject the whole snapshot.
pub fn parse_status(value: &Value) -> ParseResult<StatusSnapshot> {
    let obj = value.as_object().ok_or(ParseError::UnexpectedShape {
        what: "status",
        expected: "object",
    })?;

    let helmet = match obj.get("helmet") {
        None | Some(Value::Null) => HelmetState::default(),
        Some(Value::String(s)) => s.parse()?,
        Some(other) => return Err(ParseError::invalid("helmet", other)),
    };

    let accident = match obj.get("accident") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(other) => return Err(ParseError::invalid("accident", other)),
    };

    let fatigue = match obj.get("fatigue") {
        None | Some(Value::Null) => FatigueLevel::default(),
        Some(Value::String(s)) => s.parse()?,
        Some(other) => return Err(ParseError::invalid("fatigue", other)),
    };

    let last_update = match obj.get("lastUpdate") {
        None | Some(Value::Null) => None,
        Some(v) => Some(parse_timestamp(v)?),
    };

    Ok(StatusSnapshot {
        helmet,
        accident,
        fatigue,
        location: obj.get("location").and_then(parse_location),
        last_update,
    })
}

fn parse_location(value: &Value) -> Option<Location> {
    let obj: &Map<String, Value> = value.as_object()?;
    let lat = obj.get("lat").or_else(|| obj.get("latitude"))?.as_f64()?;
    let lng = obj.get("lng").or_else(|| obj.get("longitude"))?.as_f64()?;
    let location = Location::new(lat, lng);
    if location.is_none() {
        warn!("Ignoring out-of-range location ({}, {})", lat, lng);
    }
    location
}
