//! Record — the open attribute set produced for every logical line.
//!
//! `@timestamp` is held as a typed `DateTime<Utc>` whenever it is known;
//! every other attribute lives in a JSON map. Serialization writes
//! `@timestamp` first (RFC 3339, millisecond precision) followed by the
//! remaining attributes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use super::coerce::is_truthy;

/// Attribute carrying the logical source tag.
pub const LOG_SOURCE_FIELD: &str = "logSource";
/// Attribute carrying the raw input when raw-line retention is on.
pub const ORIGINAL_LINE_FIELD: &str = "originalLine";
pub const TIMESTAMP_FIELD: &str = "@timestamp";
/// Name of the pattern that produced the record.
pub const TYPE_FIELD: &str = "_type";
pub const MESSAGE_FIELD: &str = "message";
/// Transient raw timestamp capture, never present in a finalized record.
pub const RAW_TS_FIELD: &str = "ts";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    timestamp: Option<DateTime<Utc>>,
    fields: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty record tagged with its source.
    pub fn for_source(source: &str) -> Self {
        let mut record = Self::new();
        record.insert(LOG_SOURCE_FIELD, Value::String(source.to_string()));
        record
    }

    /// Raw fallback record: wall-clock timestamp, the line as `message`,
    /// and the source tag.
    pub fn fallback(line: &str, source: &str) -> Self {
        let mut record = Self::new();
        record.set_timestamp(Utc::now());
        record.insert(MESSAGE_FIELD, Value::String(line.to_string()));
        record.insert(LOG_SOURCE_FIELD, Value::String(source.to_string()));
        record
    }

    /// Wrap a decoded JSON object. An RFC 3339 `@timestamp` string is lifted
    /// into the typed timestamp; anything else under that key is kept verbatim.
    pub fn from_object(mut fields: Map<String, Value>) -> Self {
        let timestamp = fields
            .get(TIMESTAMP_FIELD)
            .and_then(Value::as_str)
            .and_then(parse_rfc3339);
        if timestamp.is_some() {
            fields.remove(TIMESTAMP_FIELD);
        }
        Self { timestamp, fields }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.fields.remove(TIMESTAMP_FIELD);
        self.timestamp = Some(timestamp);
    }

    /// True when `@timestamp` is set, either typed or as a truthy raw value.
    pub fn has_timestamp(&self) -> bool {
        self.timestamp.is_some()
            || self.fields.get(TIMESTAMP_FIELD).map(is_truthy).unwrap_or(false)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Assign an attribute. Writing `@timestamp` directly replaces the typed
    /// timestamp with the raw value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if name == TIMESTAMP_FIELD {
            self.timestamp = None;
        }
        self.fields.insert(name, value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        if name == TIMESTAMP_FIELD {
            if let Some(ts) = self.timestamp.take() {
                return Some(Value::String(format_timestamp(&ts)));
            }
        }
        self.fields.remove(name)
    }

    pub fn type_name(&self) -> Option<&str> {
        self.get(TYPE_FIELD).and_then(Value::as_str)
    }

    pub fn message(&self) -> Option<&str> {
        self.get(MESSAGE_FIELD).and_then(Value::as_str)
    }

    pub fn source(&self) -> Option<&str> {
        self.get(LOG_SOURCE_FIELD).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len() + usize::from(self.timestamp.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        if let Some(ts) = &self.timestamp {
            map.serialize_entry(TIMESTAMP_FIELD, &format_timestamp(ts))?;
        }
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_fallback_record_shape() {
        let record = Record::fallback("raw text", "app.log");
        assert!(record.timestamp().is_some());
        assert_eq!(record.message(), Some("raw text"));
        assert_eq!(record.source(), Some("app.log"));
        assert!(record.type_name().is_none());
    }

    #[test]
    fn test_from_object_lifts_rfc3339_timestamp() {
        let object = json!({"@timestamp": "2024-03-01T12:00:00Z", "a": 1});
        let record = Record::from_object(object.as_object().cloned().unwrap_or_default());
        assert_eq!(
            record.timestamp(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        );
        assert!(!record.contains(TIMESTAMP_FIELD));
    }

    #[test]
    fn test_from_object_keeps_opaque_timestamp() {
        let object = json!({"@timestamp": "yesterday"});
        let record = Record::from_object(object.as_object().cloned().unwrap_or_default());
        assert!(record.timestamp().is_none());
        assert!(record.has_timestamp());
        assert_eq!(record.get(TIMESTAMP_FIELD), Some(&json!("yesterday")));
    }

    #[test]
    fn test_insert_raw_timestamp_clears_typed() {
        let mut record = Record::new();
        record.set_timestamp(Utc::now());
        record.insert(TIMESTAMP_FIELD, json!("raw"));
        assert!(record.timestamp().is_none());
        assert_eq!(record.get(TIMESTAMP_FIELD), Some(&json!("raw")));
    }

    #[test]
    fn test_serialize_timestamp_first() {
        let mut record = Record::new();
        record.insert("b", json!(2));
        record.set_timestamp(Utc.with_ymd_and_hms(2023, 1, 1, 10, 0, 0).unwrap());
        let out = serde_json::to_string(&record).unwrap();
        assert_eq!(out, r#"{"@timestamp":"2023-01-01T10:00:00.000Z","b":2}"#);
    }
}
