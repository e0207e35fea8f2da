//! Processor — per-line orchestration over the snapshot, source cache and
//! failure budget.
//!
//! `LineProcessor` holds all shared parsing state. It is driven from a
//! single worker (see `service`), which keeps cache and budget mutations
//! sequential; the maps are still `DashMap`s so other tasks can inspect them.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, trace};

use super::budget::{FailureBudget, DEFAULT_TRAINING_LINES};
use super::cache::SourceCache;
use super::classify::{classify, normalize_structured, LineClass};
use super::engine::{try_match, MatchContext};
use super::metrics::{LinePath, MetricErrorType, ParsingMetrics};
use super::model::{MatchOutcome, ParseError, ParseOutcome, ParsedLine};
use super::record::{Record, ORIGINAL_LINE_FIELD, TYPE_FIELD};
use super::MAX_LINE_SIZE;
use crate::enrich::geoip::GeoLocator;
use crate::pattern::hooks::{fail_open, panic_message, HookKind};
use crate::pattern::{ConfigSnapshot, PatternGroup};

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Consecutive unmatched lines before a source is sticky-disabled.
    pub max_training_lines: u32,
    pub pattern_matching_enabled: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            max_training_lines: DEFAULT_TRAINING_LINES,
            pattern_matching_enabled: true,
        }
    }
}

/// What the inner pass decided for one line.
struct Step {
    outcome: ParseOutcome,
    record: Option<Record>,
    path: Option<LinePath>,
}

impl Step {
    fn emit(outcome: ParseOutcome, record: Record, path: LinePath) -> Self {
        Self {
            outcome,
            record: Some(record),
            path: Some(path),
        }
    }

    fn discard() -> Self {
        Self {
            outcome: ParseOutcome::Success,
            record: None,
            path: None,
        }
    }
}

pub struct LineProcessor {
    snapshot: RwLock<Arc<ConfigSnapshot>>,
    cache: SourceCache,
    budget: FailureBudget,
    settings: ProcessorSettings,
    geoip: Option<Arc<dyn GeoLocator>>,
    metrics: Arc<ParsingMetrics>,
}

impl LineProcessor {
    pub fn new(snapshot: ConfigSnapshot, settings: ProcessorSettings) -> Self {
        let ceiling = if settings.max_training_lines == 0 {
            DEFAULT_TRAINING_LINES
        } else {
            settings.max_training_lines
        };
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            cache: SourceCache::new(),
            budget: FailureBudget::new(ceiling),
            settings,
            geoip: None,
            metrics: Arc::new(ParsingMetrics::new()),
        }
    }

    pub fn with_geoip(mut self, locator: Option<Arc<dyn GeoLocator>>) -> Self {
        self.geoip = locator;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ParsingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the snapshot wholesale. Cached orders and budgets are kept
    /// until the next sweep.
    pub fn reload(&self, snapshot: ConfigSnapshot) {
        let groups = snapshot.groups().len();
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(snapshot);
        self.metrics.record_reload();
        info!(groups, "Pattern snapshot reloaded");
    }

    /// Periodic amnesty: forget every cached order and failure counter.
    pub fn reset(&self) {
        let sources = self.cache.len();
        let exhausted = self.budget.exhausted_sources().len();
        self.cache.clear();
        self.budget.clear();
        self.metrics.record_sweep();
        debug!(sources, exhausted, "Source cache and failure budget cleared");
    }

    /// Candidate order for `source`, populating the cache on a miss.
    pub fn candidates_for(&self, source: &str) -> Vec<Arc<PatternGroup>> {
        let snapshot = self.snapshot();
        self.cache.candidates_for(source, snapshot.groups())
    }

    pub fn failures(&self, source: &str) -> u32 {
        self.budget.failures(source)
    }

    pub fn cache(&self) -> &SourceCache {
        &self.cache
    }

    pub fn budget(&self) -> &FailureBudget {
        &self.budget
    }

    pub fn metrics(&self) -> Arc<ParsingMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Process one logical line into a completed [`ParsedLine`].
    pub fn process_line(&self, source: &str, line: &str) -> ParsedLine {
        if line.is_empty() {
            self.metrics.record_empty();
            return ParsedLine::new(source, ParseOutcome::Empty, None);
        }

        if line.len() > MAX_LINE_SIZE {
            self.metrics.record_error(MetricErrorType::TooLarge);
            return ParsedLine::new(
                source,
                ParseOutcome::Failed(ParseError::LineTooLarge(line.len(), MAX_LINE_SIZE)),
                Some(Record::fallback(line, source)),
            );
        }

        let started = Instant::now();
        let snapshot = self.snapshot();
        let mut partial = Record::for_source(source);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.process_inner(&snapshot, source, line, &mut partial)
        }));

        match result {
            Ok(step) => {
                if let Some(path) = step.path {
                    self.metrics
                        .record_line(path, started.elapsed().as_nanos() as u64);
                }
                ParsedLine::new(source, step.outcome, step.record)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(source = %source, error = %message, "Line processing panicked");
                self.metrics.record_error(MetricErrorType::Panic);
                ParsedLine::new(
                    source,
                    ParseOutcome::Failed(ParseError::ParserPanic(message)),
                    Some(partial),
                )
            }
        }
    }

    fn process_inner(
        &self,
        snapshot: &ConfigSnapshot,
        source: &str,
        line: &str,
        record: &mut Record,
    ) -> Step {
        if let LineClass::Structured(map) = classify(line) {
            let mut structured = normalize_structured(map, source, Utc::now());
            self.global_transform(snapshot, source, &mut structured);
            return Step::emit(ParseOutcome::Success, structured, LinePath::Json);
        }

        if !self.settings.pattern_matching_enabled {
            return self.fallback(snapshot, source, line);
        }
        if self.budget.is_exhausted(source) {
            self.budget.exhaust(source);
            self.metrics.record_sticky();
            return self.fallback(snapshot, source, line);
        }

        if snapshot.original_line() {
            record.insert(ORIGINAL_LINE_FIELD, Value::String(line.to_string()));
        }

        let ctx = MatchContext {
            snapshot,
            geoip: if snapshot.geoip_enabled() {
                self.geoip.as_deref()
            } else {
                None
            },
            metrics: &self.metrics,
        };

        let candidates = self.cache.candidates_for(source, snapshot.groups());
        for (position, group) in candidates.iter().enumerate() {
            for pattern in group.patterns() {
                match try_match(&ctx, pattern, record, line) {
                    MatchOutcome::NoMatch => continue,
                    MatchOutcome::MatchedAndDropped => {
                        self.promote(source, position);
                        self.metrics.record_dropped();
                        trace!(source = %source, pattern = pattern.label(), "Line dropped by pattern");
                        return Step::discard();
                    }
                    MatchOutcome::Matched => {
                        self.promote(source, position);
                        if record.type_name().is_none() {
                            if let Some(type_name) = group.type_name() {
                                record.insert(TYPE_FIELD, Value::String(type_name.to_string()));
                            }
                        }
                        if !record.has_timestamp() {
                            record.set_timestamp(Utc::now());
                        }
                        self.global_transform(snapshot, source, record);
                        self.budget.record_success(source);
                        return Step::emit(
                            ParseOutcome::Success,
                            std::mem::take(record),
                            LinePath::Matched,
                        );
                    }
                }
            }
        }

        let failures = self.budget.record_failure(source);
        if failures >= self.budget.ceiling() {
            info!(
                source = %source,
                failures,
                "No pattern matched within the training window; matching disabled for source until next sweep"
            );
        }
        if snapshot.debug() {
            info!(source = %source, line = %line, "No pattern matched");
        } else {
            trace!(source = %source, "No pattern matched");
        }
        self.fallback(snapshot, source, line)
    }

    fn fallback(&self, snapshot: &ConfigSnapshot, source: &str, line: &str) -> Step {
        let mut record = Record::fallback(line, source);
        self.global_transform(snapshot, source, &mut record);
        Step::emit(ParseOutcome::NotFound, record, LinePath::Fallback)
    }

    fn promote(&self, source: &str, position: usize) {
        if self.cache.promote(source, position) {
            self.metrics.record_promotion();
        }
    }

    fn global_transform(&self, snapshot: &ConfigSnapshot, source: &str, record: &mut Record) {
        if let Some(hook) = snapshot.global_transform() {
            fail_open(HookKind::GlobalTransform, source, (), &self.metrics, || {
                hook.apply(source, record)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::geoip::GeoLocation;
    use crate::pattern::hooks::HookError;
    use crate::pattern::Pattern;
    use crate::parser::record::{LOG_SOURCE_FIELD, RAW_TS_FIELD};
    use chrono::TimeZone;
    use serde_json::json;

    fn group(source: Option<&str>, type_name: &str, regex: &str, fields: &[&str]) -> PatternGroup {
        let pattern = Pattern::new(regex, fields).unwrap().with_type(type_name);
        let g = PatternGroup::new(vec![pattern]);
        match source {
            Some(s) => g.with_source(s).unwrap(),
            None => g,
        }
    }

    fn app_group() -> PatternGroup {
        let pattern = Pattern::new(r"^(\d{4}-\d\d-\d\d \S+) (\S+) (.*)$", ["ts", "level", "message"])
            .unwrap()
            .with_type("app")
            .with_date_format("YYYY-MM-DD HH:mm:ss");
        PatternGroup::new(vec![pattern])
    }

    fn processor(groups: Vec<PatternGroup>, ceiling: u32) -> LineProcessor {
        LineProcessor::new(
            ConfigSnapshot::new(groups),
            ProcessorSettings {
                max_training_lines: ceiling,
                pattern_matching_enabled: true,
            },
        )
    }

    fn labels(order: &[Arc<PatternGroup>]) -> Vec<String> {
        order
            .iter()
            .map(|g| g.patterns()[0].type_name().unwrap_or("").to_string())
            .collect()
    }

    // ── Outcomes ─────────────────────────────────────────────────

    #[test]
    fn test_empty_line() {
        let p = processor(vec![app_group()], 100);
        let parsed = p.process_line("app", "");
        assert_eq!(parsed.outcome, ParseOutcome::Empty);
        assert!(parsed.record.is_none());
        assert_eq!(p.metrics().snapshot().empty_lines, 1);
    }

    #[test]
    fn test_reference_line_success() {
        let p = processor(vec![app_group()], 100);
        let parsed = p.process_line("app.log", "2023-01-01 10:00:00 ERROR boom");

        assert_eq!(parsed.outcome, ParseOutcome::Success);
        let record = parsed.record.unwrap();
        assert_eq!(record.type_name(), Some("app"));
        assert_eq!(record.get("level"), Some(&json!("ERROR")));
        assert_eq!(record.message(), Some("boom"));
        assert_eq!(record.source(), Some("app.log"));
        assert_eq!(
            record.timestamp(),
            Some(Utc.with_ymd_and_hms(2023, 1, 1, 10, 0, 0).unwrap())
        );
        assert!(!record.contains(RAW_TS_FIELD));
    }

    #[test]
    fn test_json_bypasses_patterns() {
        let p = processor(vec![], 100);
        let parsed = p.process_line("svc", r#"{"msg":"hi"}"#);
        assert_eq!(parsed.outcome, ParseOutcome::Success);
        let record = parsed.record.unwrap();
        assert_eq!(record.message(), Some("hi"));
        assert!(record.timestamp().is_some());
        assert_eq!(p.failures("svc"), 0);
        assert_eq!(p.metrics().snapshot().json_lines, 1);
    }

    #[test]
    fn test_unmatched_line_falls_back() {
        let p = processor(vec![app_group()], 100);
        let parsed = p.process_line("app", "no structure here");
        assert_eq!(parsed.outcome, ParseOutcome::NotFound);
        let record = parsed.record.unwrap();
        assert_eq!(record.message(), Some("no structure here"));
        assert_eq!(record.source(), Some("app"));
        assert!(record.timestamp().is_some());
        assert_eq!(p.failures("app"), 1);
    }

    #[test]
    fn test_oversized_line_fails_with_fallback() {
        let p = processor(vec![app_group()], 100);
        let line = "x".repeat(MAX_LINE_SIZE + 1);
        let parsed = p.process_line("app", &line);
        assert_eq!(
            parsed.outcome,
            ParseOutcome::Failed(ParseError::LineTooLarge(MAX_LINE_SIZE + 1, MAX_LINE_SIZE))
        );
        assert_eq!(parsed.record.unwrap().message().map(str::len), Some(MAX_LINE_SIZE + 1));
    }

    #[test]
    fn test_dropped_match_yields_no_record() {
        let pattern = Pattern::new(r"^(GET) (\S+)$", ["method", "path"])
            .unwrap()
            .with_type("access")
            .with_filter(|r: &Record, _: &Pattern| -> Result<bool, HookError> {
                Ok(r.get("path") != Some(&json!("/healthz")))
            });
        let p = processor(vec![PatternGroup::new(vec![pattern])], 100);
        p.process_line("web", "unrelated");
        assert_eq!(p.failures("web"), 1);

        let parsed = p.process_line("web", "GET /healthz");
        assert_eq!(parsed.outcome, ParseOutcome::Success);
        assert!(parsed.record.is_none());
        // a drop does not reset the budget
        assert_eq!(p.failures("web"), 1);
    }

    // ── Type fallback / raw line ─────────────────────────────────

    #[test]
    fn test_group_type_used_when_pattern_untyped() {
        let pattern = Pattern::new(r"^(.*)$", ["message"]).unwrap();
        let g = PatternGroup::new(vec![pattern]).with_type("grouped");
        let p = processor(vec![g], 100);
        let record = p.process_line("s", "hello").record.unwrap();
        assert_eq!(record.type_name(), Some("grouped"));
        // no ts captured: timestamp defaults to now
        assert!(record.timestamp().is_some());
    }

    #[test]
    fn test_original_line_on_pattern_path_only() {
        let snapshot = ConfigSnapshot::new(vec![app_group()]).with_original_line(true);
        let p = LineProcessor::new(snapshot, ProcessorSettings::default());

        let matched = p.process_line("a", "2023-01-01 10:00:00 INFO ok").record.unwrap();
        assert_eq!(
            matched.get(ORIGINAL_LINE_FIELD),
            Some(&json!("2023-01-01 10:00:00 INFO ok"))
        );

        let fallback = p.process_line("a", "junk").record.unwrap();
        assert!(!fallback.contains(ORIGINAL_LINE_FIELD));

        let json = p.process_line("a", r#"{"message":"m"}"#).record.unwrap();
        assert!(!json.contains(ORIGINAL_LINE_FIELD));
    }

    #[test]
    fn test_global_transform_on_all_paths() {
        let snapshot = ConfigSnapshot::new(vec![app_group()]).with_global_transform(
            |source: &str, r: &mut Record| -> Result<(), HookError> {
                r.insert("seen_by", json!(source));
                Ok(())
            },
        );
        let p = LineProcessor::new(snapshot, ProcessorSettings::default());

        for line in ["2023-01-01 10:00:00 INFO ok", "junk", r#"{"a":1}"#] {
            let record = p.process_line("src", line).record.unwrap();
            assert_eq!(record.get("seen_by"), Some(&json!("src")), "line {line}");
        }
    }

    #[test]
    fn test_global_transform_failure_is_ignored() {
        let snapshot = ConfigSnapshot::new(vec![]).with_global_transform(
            |_: &str, _: &mut Record| -> Result<(), HookError> { Err(HookError::failed("x")) },
        );
        let p = LineProcessor::new(snapshot, ProcessorSettings::default());
        let parsed = p.process_line("s", "line");
        assert_eq!(parsed.outcome, ParseOutcome::NotFound);
        assert_eq!(p.metrics().snapshot().hook_failures, 1);
    }

    // ── Reordering ───────────────────────────────────────────────

    #[test]
    fn test_bubble_up_and_idempotent_head() {
        let groups = vec![
            group(None, "a", r"^A (.*)$", &["message"]),
            group(None, "b", r"^B (.*)$", &["message"]),
            group(None, "c", r"^C (.*)$", &["message"]),
        ];
        let p = processor(groups, 100);

        p.process_line("s", "C third");
        assert_eq!(labels(&p.candidates_for("s")), vec!["c", "b", "a"]);

        p.process_line("s", "C again");
        assert_eq!(labels(&p.candidates_for("s")), vec!["c", "b", "a"]);

        p.process_line("s", "B second");
        assert_eq!(labels(&p.candidates_for("s")), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_dropped_match_also_bubbles_up() {
        let noisy = Pattern::new(r"^C (.*)$", ["message"])
            .unwrap()
            .with_type("c")
            .with_input_drop(crate::pattern::RegexPredicate(regex::Regex::new("heartbeat").unwrap()));
        let groups = vec![
            group(None, "a", r"^A (.*)$", &["message"]),
            group(None, "b", r"^B (.*)$", &["message"]),
            PatternGroup::new(vec![noisy]),
        ];
        let p = processor(groups, 100);

        p.process_line("s", "nothing matches");
        assert_eq!(p.failures("s"), 1);

        let parsed = p.process_line("s", "C heartbeat");
        assert_eq!(parsed.outcome, ParseOutcome::Success);
        assert!(parsed.record.is_none());
        assert_eq!(labels(&p.candidates_for("s")), vec!["c", "b", "a"]);
        assert_eq!(p.failures("s"), 1);
        assert_eq!(p.metrics().snapshot().dropped_lines, 1);
    }

    #[test]
    fn test_source_matching_groups_first() {
        let groups = vec![
            group(Some("db"), "db", r"^(.*)$", &["message"]),
            group(Some("web"), "web", r"^(.*)$", &["message"]),
        ];
        let p = processor(groups, 100);
        let record = p.process_line("web-1", "hello").record.unwrap();
        assert_eq!(record.type_name(), Some("web"));
        assert_eq!(labels(&p.candidates_for("web-1")), vec!["web", "db"]);
    }

    #[test]
    fn test_empty_source_uses_global_order_uncached() {
        let p = processor(vec![app_group()], 100);
        let parsed = p.process_line("", "2023-01-01 10:00:00 INFO ok");
        assert_eq!(parsed.outcome, ParseOutcome::Success);
        assert_eq!(parsed.record.unwrap().get(LOG_SOURCE_FIELD), Some(&json!("")));
        assert!(p.cache().is_empty());
    }

    // ── Failure budget ───────────────────────────────────────────

    #[test]
    fn test_training_window_then_sticky() {
        let p = processor(vec![app_group()], 3);
        for expected in 1..=3 {
            assert_eq!(p.process_line("s", "junk").outcome, ParseOutcome::NotFound);
            assert_eq!(p.failures("s"), expected);
        }

        // exhausted: even a matching line takes the fallback
        let parsed = p.process_line("s", "2023-01-01 10:00:00 INFO ok");
        assert_eq!(parsed.outcome, ParseOutcome::NotFound);
        assert!(parsed.record.unwrap().type_name().is_none());
        assert_eq!(p.failures("s"), 3);
        assert_eq!(p.metrics().snapshot().sticky_lines, 1);

        p.reset();
        assert_eq!(p.failures("s"), 0);
        let parsed = p.process_line("s", "2023-01-01 10:00:00 INFO ok");
        assert_eq!(parsed.outcome, ParseOutcome::Success);
    }

    #[test]
    fn test_success_resets_budget() {
        let p = processor(vec![app_group()], 10);
        p.process_line("s", "junk");
        p.process_line("s", "junk");
        assert_eq!(p.failures("s"), 2);
        p.process_line("s", "2023-01-01 10:00:00 INFO ok");
        assert_eq!(p.failures("s"), 0);
    }

    #[test]
    fn test_matching_disabled_globally() {
        let p = LineProcessor::new(
            ConfigSnapshot::new(vec![app_group()]).with_original_line(true),
            ProcessorSettings {
                max_training_lines: 100,
                pattern_matching_enabled: false,
            },
        );
        let parsed = p.process_line("s", "2023-01-01 10:00:00 INFO ok");
        assert_eq!(parsed.outcome, ParseOutcome::NotFound);
        let record = parsed.record.unwrap();
        assert!(record.type_name().is_none());
        assert!(!record.contains(ORIGINAL_LINE_FIELD));
        assert_eq!(p.failures("s"), 0);
    }

    #[test]
    fn test_zero_training_lines_uses_default() {
        let p = processor(vec![], 0);
        assert_eq!(p.budget().ceiling(), DEFAULT_TRAINING_LINES);
    }

    // ── Reload / reset ───────────────────────────────────────────

    #[test]
    fn test_reload_keeps_cached_order() {
        let p = processor(vec![group(None, "old", r"^(.*)$", &["message"])], 100);
        p.process_line("s", "x");
        p.reload(ConfigSnapshot::new(vec![group(None, "new", r"^(.*)$", &["message"])]));

        // stale order survives until the sweep
        let record = p.process_line("s", "x").record.unwrap();
        assert_eq!(record.type_name(), Some("old"));

        p.reset();
        let record = p.process_line("s", "x").record.unwrap();
        assert_eq!(record.type_name(), Some("new"));

        let snap = p.metrics().snapshot();
        assert_eq!(snap.reloads, 1);
        assert_eq!(snap.cache_sweeps, 1);
    }

    // ── GeoIP ────────────────────────────────────────────────────

    struct Everywhere;

    impl GeoLocator for Everywhere {
        fn locate(&self, _address: &str) -> Option<GeoLocation> {
            Some(GeoLocation {
                longitude: 1.0,
                latitude: 2.0,
                info: json!({}),
            })
        }
    }

    struct Exploding;

    impl GeoLocator for Exploding {
        fn locate(&self, _address: &str) -> Option<GeoLocation> {
            panic!("corrupt database")
        }
    }

    fn geoip_processor(enabled: bool, locator: Arc<dyn GeoLocator>) -> LineProcessor {
        let pattern = Pattern::new(r"^(\S+) (\S+)$", ["ip", "ip"])
            .unwrap()
            .with_type("net")
            .with_geoip_field("ip");
        let snapshot =
            ConfigSnapshot::new(vec![PatternGroup::new(vec![pattern])]).with_geoip(enabled, None);
        LineProcessor::new(snapshot, ProcessorSettings::default()).with_geoip(Some(locator))
    }

    #[test]
    fn test_panic_is_reported_with_partial_record() {
        let p = geoip_processor(true, Arc::new(Exploding));
        let parsed = p.process_line("s", "1.1.1.1 2.2.2.2");

        assert!(matches!(
            parsed.outcome,
            ParseOutcome::Failed(ParseError::ParserPanic(ref msg)) if msg == "corrupt database"
        ));
        let partial = parsed.record.unwrap();
        assert_eq!(partial.type_name(), Some("net"));
        assert_eq!(partial.get("ip"), Some(&json!("1.1.1.1")));
        assert_eq!(p.metrics().snapshot().panics, 1);
    }

    #[test]
    fn test_geoip_only_when_enabled_in_snapshot() {
        let on = geoip_processor(true, Arc::new(Everywhere)).process_line("s", "1.1.1.1 2.2.2.2").record.unwrap();
        assert!(on.contains("geoip"));

        let off = geoip_processor(false, Arc::new(Everywhere)).process_line("s", "1.1.1.1 2.2.2.2").record.unwrap();
        assert!(!off.contains("geoip"));
    }
}
