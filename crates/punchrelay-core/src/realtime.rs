//! # Realtime Push Normalization
//!
//! The terminal's realtime callback delivers loosely shaped JSON. Depending
//! on firmware the user id may arrive as `userId`, `deviceUserId`, `uid` or
//! `user_id`, and the timestamp under one of several names and formats.
//! This module folds all of that into an [`AttendanceRecord`].
//!
//! ## Field Resolution (first non-empty wins)
//! ```text
//! user id   : userId → deviceUserId → uid → user_id      (required)
//! time      : attTime → recordTime → time → timestamp    (else "now")
//! device id : deviceId → device_id
//! user name : userName → name → user_name
//! ```
//!
//! A time field that is present but unparseable leaves `record_time` empty
//! so the processor rejects the punch, rather than silently stamping it
//! with the current time.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::{CoreError, ValidationError};
use crate::types::AttendanceRecord;

const USER_ID_KEYS: [&str; 4] = ["userId", "deviceUserId", "uid", "user_id"];
const TIME_KEYS: [&str; 4] = ["attTime", "recordTime", "time", "timestamp"];
const DEVICE_ID_KEYS: [&str; 2] = ["deviceId", "device_id"];
const USER_NAME_KEYS: [&str; 3] = ["userName", "name", "user_name"];

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

// =============================================================================
// Timestamp Parsing
// =============================================================================

/// Parses a terminal timestamp string.
///
/// Accepts RFC 3339, naive `YYYY-MM-DD HH:MM:SS` (space or `T` separated,
/// interpreted as UTC) and epoch milliseconds.
pub fn parse_record_time(raw: &str) -> Result<DateTime<Utc>, CoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CoreError::InvalidTimestamp("empty".to_string()));
    }

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    if raw.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(millis) = raw.parse::<i64>() {
            return from_epoch_millis(millis);
        }
    }

    Err(CoreError::InvalidTimestamp(raw.to_string()))
}

/// Parses a timestamp carried as a JSON string or number.
pub fn parse_record_time_value(value: &Value) -> Result<DateTime<Utc>, CoreError> {
    match value {
        Value::String(s) => parse_record_time(s),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| CoreError::InvalidTimestamp(n.to_string()))
            .and_then(from_epoch_millis),
        other => Err(CoreError::InvalidTimestamp(other.to_string())),
    }
}

fn from_epoch_millis(millis: i64) -> Result<DateTime<Utc>, CoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| CoreError::InvalidTimestamp(millis.to_string()))
}

// =============================================================================
// Push Normalization
// =============================================================================

/// A normalized realtime punch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimePunch {
    pub record: AttendanceRecord,
    /// True when the push carried no time field and "now" was used.
    pub stamped_now: bool,
}

/// Normalizes a realtime push into a record.
///
/// Fails with `Required("payload")` for a null push and
/// `Required("userId")` when no user id field is present.
pub fn normalize_realtime(raw: &Value, now: DateTime<Utc>) -> Result<RealtimePunch, ValidationError> {
    if raw.is_null() {
        return Err(ValidationError::required("payload"));
    }

    let user_id = first_text(raw, &USER_ID_KEYS).ok_or_else(|| ValidationError::required("userId"))?;

    let (record_time, stamped_now) = match first_present(raw, &TIME_KEYS) {
        Some(value) => (parse_record_time_value(value).ok(), false),
        None => (Some(now), true),
    };

    let record = AttendanceRecord {
        device_user_id: Some(user_id),
        record_time,
        user_name: first_text(raw, &USER_NAME_KEYS),
        device_id: first_text(raw, &DEVICE_ID_KEYS),
    };

    Ok(RealtimePunch { record, stamped_now })
}

/// Returns the first key whose value is a non-empty string or a number.
fn first_text(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn first_present<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| match raw.get(*key)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        value => Some(value),
    })
}
