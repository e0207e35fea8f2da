//! Engine — trying one pattern against one logical line.
//!
//! The record passed in is shared by every candidate tried for the line, so
//! a pattern that matches lexically but not structurally may still leave its
//! `_type` behind; the next candidate overwrites it.

use serde_json::Value;
use tracing::trace;

use super::coerce::{force_number, is_truthy, number_to_string, numeric_capture, string_form};
use super::metrics::ParsingMetrics;
use super::model::MatchOutcome;
use super::record::{Record, RAW_TS_FIELD, TYPE_FIELD};
use crate::enrich::date::parse_date;
use crate::enrich::geoip::{self, GeoLocator};
use crate::enrich::hash::hash_value;
use crate::pattern::hooks::{fail_open, HookKind};
use crate::pattern::{ConfigSnapshot, Pattern};

/// Everything a match attempt reads besides the pattern and the line.
pub struct MatchContext<'a> {
    pub snapshot: &'a ConfigSnapshot,
    /// Present only when GeoIP is enabled and initialized.
    pub geoip: Option<&'a dyn GeoLocator>,
    pub metrics: &'a ParsingMetrics,
}

pub fn try_match(
    ctx: &MatchContext<'_>,
    pattern: &Pattern,
    record: &mut Record,
    line: &str,
) -> MatchOutcome {
    let Some(captures) = pattern.regex().captures(line) else {
        return MatchOutcome::NoMatch;
    };
    let label = pattern.label();

    if let Some(accept) = pattern.input_filter() {
        let keep = fail_open(HookKind::InputFilter, label, true, ctx.metrics, || accept.test(line));
        if !keep {
            return MatchOutcome::MatchedAndDropped;
        }
    }
    if let Some(reject) = pattern.input_drop() {
        let drop = fail_open(HookKind::InputDrop, label, false, ctx.metrics, || reject.test(line));
        if drop {
            return MatchOutcome::MatchedAndDropped;
        }
    }

    match pattern.type_name() {
        Some(type_name) => record.insert(TYPE_FIELD, Value::String(type_name.to_string())),
        None => {
            record.remove(TYPE_FIELD);
        }
    }

    // capture count includes the whole-match group
    if captures.len() <= pattern.fields().len() {
        trace!(pattern = label, "Lexical match without enough capture groups");
        return MatchOutcome::NoMatch;
    }

    for (i, field) in pattern.fields().iter().enumerate() {
        let mut value = captures.get(i + 1).map(|m| numeric_capture(m.as_str()));

        if let (Some(rule), Some(current)) = (ctx.snapshot.autohash(), value.as_ref()) {
            if rule.is_match(&field.name) {
                value = Some(hash_value(current));
            }
        }

        // Reads the value already on the record, before this capture lands.
        if pattern.geoip_field() == Some(field.name.as_str()) {
            if let Some(locator) = ctx.geoip {
                geoip::enrich(record, &field.name, locator);
            }
        }

        let value = match value {
            Some(Value::String(s)) if field.to_number => Some(force_number(&s)),
            Some(Value::Number(n)) if field.to_string => Some(Value::String(number_to_string(&n))),
            other => other,
        };

        match value {
            Some(v) => record.insert(field.name.clone(), v),
            None => {
                record.remove(&field.name);
            }
        }
    }

    let raw_ts = record
        .get(RAW_TS_FIELD)
        .filter(|v| is_truthy(v))
        .map(string_form);
    if let Some(raw) = raw_ts {
        match parse_date(&raw, pattern.date_format(), ctx.snapshot.date_formats()) {
            Some(ts) => record.set_timestamp(ts),
            None => trace!(pattern = label, ts = %raw, "Unparseable timestamp"),
        }
    }

    if let Some(transform) = pattern.transform() {
        fail_open(HookKind::Transform, label, (), ctx.metrics, || transform.transform(record));
    }

    if let Some(filter) = pattern.filter() {
        let keep = fail_open(HookKind::Filter, label, true, ctx.metrics, || filter.keep(record, pattern));
        if !keep {
            return MatchOutcome::MatchedAndDropped;
        }
    }

    record.remove(RAW_TS_FIELD);
    MatchOutcome::Matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::geoip::GeoLocation;
    use crate::pattern::hooks::HookError;
    use crate::pattern::PatternGroup;
    use chrono::{TimeZone, Utc};
    use regex::Regex;
    use serde_json::json;

    fn attempt(snapshot: &ConfigSnapshot, pattern: &Pattern, line: &str) -> (MatchOutcome, Record) {
        let metrics = ParsingMetrics::new();
        let ctx = MatchContext {
            snapshot,
            geoip: None,
            metrics: &metrics,
        };
        let mut record = Record::for_source("test");
        let outcome = try_match(&ctx, pattern, &mut record, line);
        (outcome, record)
    }

    fn app_pattern() -> Pattern {
        Pattern::new(r"^(\S+ \S+) (\S+) (.*)$", ["ts", "level", "message"])
            .unwrap()
            .with_type("app")
            .with_date_format("YYYY-MM-DD HH:mm:ss")
    }

    // ── Extraction ───────────────────────────────────────────────

    #[test]
    fn test_reference_line() {
        let snapshot = ConfigSnapshot::default();
        let (outcome, record) = attempt(&snapshot, &app_pattern(), "2023-01-01 10:00:00 ERROR boom");

        assert_eq!(outcome, MatchOutcome::Matched);
        assert_eq!(record.type_name(), Some("app"));
        assert_eq!(record.get("level"), Some(&json!("ERROR")));
        assert_eq!(record.message(), Some("boom"));
        assert_eq!(
            record.timestamp(),
            Some(Utc.with_ymd_and_hms(2023, 1, 1, 10, 0, 0).unwrap())
        );
        assert!(!record.contains(RAW_TS_FIELD));
    }

    #[test]
    fn test_no_lexical_match() {
        let snapshot = ConfigSnapshot::default();
        let (outcome, record) = attempt(&snapshot, &app_pattern(), "nope");
        assert_eq!(outcome, MatchOutcome::NoMatch);
        assert!(record.type_name().is_none());
    }

    #[test]
    fn test_structural_mismatch_is_no_match() {
        let snapshot = ConfigSnapshot::default();
        let pattern = Pattern::new(r"^(\S+) (.*)$", ["a", "b", "c"]).unwrap().with_type("x");
        let (outcome, record) = attempt(&snapshot, &pattern, "one two");
        assert_eq!(outcome, MatchOutcome::NoMatch);
        assert!(!record.contains("a"));
    }

    #[test]
    fn test_numeric_captures_are_coerced() {
        let snapshot = ConfigSnapshot::default();
        let pattern = Pattern::new(r"^(\S+) (\S+)$", ["status", "path"]).unwrap();
        let (_, record) = attempt(&snapshot, &pattern, "404 /index");
        assert_eq!(record.get("status"), Some(&json!(404)));
        assert_eq!(record.get("path"), Some(&json!("/index")));
    }

    #[test]
    fn test_number_hint_defaults_to_zero() {
        let snapshot = ConfigSnapshot::default();
        let pattern = Pattern::new(r"^(\S+)$", ["bytes:number"]).unwrap();
        let (_, record) = attempt(&snapshot, &pattern, "-");
        assert_eq!(record.get("bytes"), Some(&json!(0)));
    }

    #[test]
    fn test_string_hint_keeps_text() {
        let snapshot = ConfigSnapshot::default();
        let pattern = Pattern::new(r"^(\S+)$", ["code:string"]).unwrap();
        let (_, record) = attempt(&snapshot, &pattern, "0042");
        assert_eq!(record.get("code"), Some(&json!("42")));
    }

    #[test]
    fn test_optional_capture_removes_field() {
        let snapshot = ConfigSnapshot::default();
        let pattern = Pattern::new(r"^(\w+)(?: (\w+))?$", ["a", "b"]).unwrap();
        let (outcome, record) = attempt(&snapshot, &pattern, "only");
        assert_eq!(outcome, MatchOutcome::Matched);
        assert_eq!(record.get("a"), Some(&json!("only")));
        assert!(!record.contains("b"));
    }

    #[test]
    fn test_untyped_pattern_clears_type() {
        let snapshot = ConfigSnapshot::default();
        let metrics = ParsingMetrics::new();
        let ctx = MatchContext {
            snapshot: &snapshot,
            geoip: None,
            metrics: &metrics,
        };
        let mut record = Record::new();
        record.insert(TYPE_FIELD, json!("stale"));
        let pattern = Pattern::new(r"^(.*)$", ["message"]).unwrap();
        try_match(&ctx, &pattern, &mut record, "x");
        assert!(record.type_name().is_none());
    }

    #[test]
    fn test_autohash_by_field_name() {
        let snapshot =
            ConfigSnapshot::default().with_autohash(Regex::new("^password$").unwrap());
        let pattern = Pattern::new(r"^(\S+) (\S+)$", ["user", "password"]).unwrap();
        let (_, record) = attempt(&snapshot, &pattern, "bob abc");
        assert_eq!(record.get("user"), Some(&json!("bob")));
        assert_eq!(
            record.get("password"),
            Some(&json!("a9993e364706816aba3e25717850c26c9cd0d89d"))
        );
    }

    // ── Dates ────────────────────────────────────────────────────

    #[test]
    fn test_date_uses_fallback_formats() {
        let snapshot = ConfigSnapshot::default().with_date_formats(["DD/MM/YYYY"]);
        let pattern = Pattern::new(r"^(\S+) (.*)$", ["ts", "message"]).unwrap();
        let (_, record) = attempt(&snapshot, &pattern, "31/12/2020 bye");
        assert_eq!(
            record.timestamp(),
            Some(Utc.with_ymd_and_hms(2020, 12, 31, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_unparseable_date_leaves_timestamp_unset() {
        let snapshot = ConfigSnapshot::default();
        let pattern = Pattern::new(r"^(\S+) (.*)$", ["ts", "message"]).unwrap();
        let (outcome, record) = attempt(&snapshot, &pattern, "whenever hi");
        assert_eq!(outcome, MatchOutcome::Matched);
        assert!(record.timestamp().is_none());
        assert!(!record.contains(RAW_TS_FIELD));
    }

    // ── Hooks ────────────────────────────────────────────────────

    #[test]
    fn test_input_filter_false_drops() {
        let snapshot = ConfigSnapshot::default();
        let pattern = app_pattern()
            .with_input_filter(|line: &str| -> Result<bool, HookError> { Ok(line.contains("WARN")) });
        let (outcome, record) = attempt(&snapshot, &pattern, "2023-01-01 10:00:00 ERROR boom");
        assert_eq!(outcome, MatchOutcome::MatchedAndDropped);
        // dropped before the type is written
        assert!(record.type_name().is_none());
    }

    #[test]
    fn test_input_filter_error_accepts() {
        let snapshot = ConfigSnapshot::default();
        let pattern = app_pattern().with_input_filter(|_: &str| -> Result<bool, HookError> {
            Err(HookError::failed("nope"))
        });
        let (outcome, _) = attempt(&snapshot, &pattern, "2023-01-01 10:00:00 ERROR boom");
        assert_eq!(outcome, MatchOutcome::Matched);
    }

    #[test]
    fn test_input_drop_true_drops() {
        let snapshot = ConfigSnapshot::default();
        let pattern = app_pattern().with_input_drop(crate::pattern::RegexPredicate(
            Regex::new("healthz").unwrap(),
        ));
        let (outcome, _) = attempt(&snapshot, &pattern, "2023-01-01 10:00:00 INFO GET /healthz");
        assert_eq!(outcome, MatchOutcome::MatchedAndDropped);
    }

    #[test]
    fn test_input_drop_panic_does_not_drop() {
        let snapshot = ConfigSnapshot::default();
        let pattern = app_pattern()
            .with_input_drop(|_: &str| -> Result<bool, HookError> { panic!("bad predicate") });
        let (outcome, _) = attempt(&snapshot, &pattern, "2023-01-01 10:00:00 INFO ok");
        assert_eq!(outcome, MatchOutcome::Matched);
    }

    #[test]
    fn test_transform_failure_keeps_partial_mutation() {
        let snapshot = ConfigSnapshot::default();
        let pattern = app_pattern().with_transform(|r: &mut Record| -> Result<(), HookError> {
            r.insert("tagged", json!(true));
            Err(HookError::failed("half done"))
        });
        let (outcome, record) = attempt(&snapshot, &pattern, "2023-01-01 10:00:00 INFO ok");
        assert_eq!(outcome, MatchOutcome::Matched);
        assert_eq!(record.get("tagged"), Some(&json!(true)));
    }

    #[test]
    fn test_filter_false_drops() {
        let snapshot = ConfigSnapshot::default();
        let pattern = app_pattern().with_filter(|r: &Record, _: &Pattern| -> Result<bool, HookError> {
            Ok(r.get("level") != Some(&json!("DEBUG")))
        });
        let (outcome, _) = attempt(&snapshot, &pattern, "2023-01-01 10:00:00 DEBUG noise");
        assert_eq!(outcome, MatchOutcome::MatchedAndDropped);
    }

    #[test]
    fn test_filter_error_keeps_record() {
        let snapshot = ConfigSnapshot::default();
        let pattern = app_pattern().with_filter(|_: &Record, _: &Pattern| -> Result<bool, HookError> {
            Err(HookError::failed("filter broke"))
        });
        let (outcome, record) = attempt(&snapshot, &pattern, "2023-01-01 10:00:00 INFO ok");
        assert_eq!(outcome, MatchOutcome::Matched);
        assert!(!record.contains(RAW_TS_FIELD));
    }

    #[test]
    fn test_filter_sees_pattern() {
        let snapshot = ConfigSnapshot::default();
        let pattern = app_pattern().with_filter(|_: &Record, p: &Pattern| -> Result<bool, HookError> {
            Ok(p.type_name() == Some("app"))
        });
        let (outcome, _) = attempt(&snapshot, &pattern, "2023-01-01 10:00:00 INFO ok");
        assert_eq!(outcome, MatchOutcome::Matched);
    }

    // ── GeoIP ────────────────────────────────────────────────────

    struct OneHost;

    impl GeoLocator for OneHost {
        fn locate(&self, address: &str) -> Option<GeoLocation> {
            (address == "1.2.3.4").then(|| GeoLocation {
                longitude: 10.0,
                latitude: 20.0,
                info: json!({"city": "Somewhere"}),
            })
        }
    }

    #[test]
    fn test_geoip_reads_value_before_assignment() {
        let snapshot = ConfigSnapshot::default();
        let metrics = ParsingMetrics::new();
        let locator = OneHost;
        let ctx = MatchContext {
            snapshot: &snapshot,
            geoip: Some(&locator),
            metrics: &metrics,
        };
        let pattern = Pattern::new(r"^(\S+) (\S+)$", ["client", "client"])
            .unwrap()
            .with_geoip_field("client");

        // first field writes client, second field looks it up before overwriting
        let mut record = Record::new();
        try_match(&ctx, &pattern, &mut record, "1.2.3.4 5.6.7.8");
        assert_eq!(record.get("client"), Some(&json!("5.6.7.8")));
        assert_eq!(
            record.get(geoip::GEOIP_FIELD).map(|g| g["location"].clone()),
            Some(json!([10.0, 20.0]))
        );
    }

    #[test]
    fn test_geoip_single_field_uses_stale_value() {
        let snapshot = ConfigSnapshot::default();
        let metrics = ParsingMetrics::new();
        let locator = OneHost;
        let ctx = MatchContext {
            snapshot: &snapshot,
            geoip: Some(&locator),
            metrics: &metrics,
        };
        let pattern = Pattern::new(r"^(\S+)$", ["client"])
            .unwrap()
            .with_geoip_field("client");

        let mut record = Record::new();
        try_match(&ctx, &pattern, &mut record, "1.2.3.4");
        assert!(!record.contains(geoip::GEOIP_FIELD));
        assert_eq!(record.get("client"), Some(&json!("1.2.3.4")));
    }

    #[test]
    fn test_group_type_is_not_applied_here() {
        let snapshot = ConfigSnapshot::new(vec![PatternGroup::new(vec![]).with_type("grp")]);
        let pattern = Pattern::new(r"^(.*)$", ["message"]).unwrap();
        let (_, record) = attempt(&snapshot, &pattern, "x");
        assert!(record.type_name().is_none());
    }
}
