//! Classify — JSON fast path vs. pattern matching, and normalization of
//! structured lines.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::coerce::{is_truthy, parse_numeric};
use super::record::{parse_rfc3339, Record, LOG_SOURCE_FIELD, MESSAGE_FIELD};

#[derive(Debug, Clone, PartialEq)]
pub enum LineClass {
    /// A JSON object, or a single-element array holding one.
    Structured(Map<String, Value>),
    PlainText,
}

/// Decide which path a logical line takes. Invalid JSON is silently routed
/// to `PlainText`.
pub fn classify(line: &str) -> LineClass {
    let trimmed = line.trim();
    if !has_json_shape(trimmed.as_bytes()) {
        return LineClass::PlainText;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => LineClass::Structured(map),
        Ok(Value::Array(mut items)) if items.len() == 1 => match items.pop() {
            Some(Value::Object(map)) => LineClass::Structured(map),
            _ => LineClass::PlainText,
        },
        _ => LineClass::PlainText,
    }
}

/// Cheap single-line `{...}` / `[{...}]` check before a full parse.
fn has_json_shape(bytes: &[u8]) -> bool {
    if bytes.contains(&b'\n') {
        return false;
    }
    let inner = bytes.strip_prefix(b"[").unwrap_or(bytes);
    let inner = inner.strip_suffix(b"]").unwrap_or(inner);
    inner.len() >= 2 && inner.starts_with(b"{") && inner.ends_with(b"}")
}

/// Turn a decoded JSON object into a finalized record.
///
/// `@timestamp` is taken from the object, else from an RFC 3339 `time`/`t`
/// attribute, else from `timestamp` (epoch seconds) when `task_uuid` is
/// present, else `now`. `message` falls back to a truthy `msg`.
pub fn normalize_structured(map: Map<String, Value>, source: &str, now: DateTime<Utc>) -> Record {
    let mut record = Record::from_object(map);

    if !record.has_timestamp() {
        let derived = ["time", "t"]
            .iter()
            .find_map(|key| record.get(key).and_then(Value::as_str).and_then(parse_rfc3339))
            .or_else(|| task_timestamp(&record))
            .unwrap_or(now);
        record.set_timestamp(derived);
    }

    let has_message = record.get(MESSAGE_FIELD).map(is_truthy).unwrap_or(false);
    if !has_message {
        if let Some(msg) = record.get("msg").filter(|v| is_truthy(v)).cloned() {
            record.insert(MESSAGE_FIELD, msg);
        }
    }

    if !record.contains(LOG_SOURCE_FIELD) {
        record.insert(LOG_SOURCE_FIELD, Value::String(source.to_string()));
    }
    record
}

fn task_timestamp(record: &Record) -> Option<DateTime<Utc>> {
    if !record.get("task_uuid").map(is_truthy).unwrap_or(false) {
        return None;
    }
    let seconds = match record.get("timestamp")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) if !s.trim().is_empty() => parse_numeric(s)?,
        _ => return None,
    };
    DateTime::from_timestamp_millis((seconds * 1000.0) as i64)
}
