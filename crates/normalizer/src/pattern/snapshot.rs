//! Snapshot — the immutable bundle of pattern groups and global options.
//!
//! A snapshot is built once per load and replaced wholesale on reload; the
//! processor only ever holds it behind an `Arc`.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;

use super::hooks::GlobalTransform;
use super::model::PatternGroup;
use crate::enrich::date::DateFormat;

#[derive(Clone, Default)]
pub struct ConfigSnapshot {
    groups: Vec<Arc<PatternGroup>>,
    date_formats: Vec<DateFormat>,
    autohash: Option<Regex>,
    global_transform: Option<Arc<dyn GlobalTransform>>,
    geoip: bool,
    maxmind_db_dir: Option<PathBuf>,
    original_line: bool,
    debug: bool,
}

impl ConfigSnapshot {
    pub fn new(groups: Vec<PatternGroup>) -> Self {
        Self {
            groups: groups.into_iter().map(Arc::new).collect(),
            ..Self::default()
        }
    }

    pub fn with_date_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.date_formats = formats
            .into_iter()
            .map(|f| DateFormat::from_moment(f.as_ref()))
            .collect();
        self
    }

    pub fn with_autohash(mut self, rule: Regex) -> Self {
        self.autohash = Some(rule);
        self
    }

    pub fn with_global_transform(mut self, hook: impl GlobalTransform + 'static) -> Self {
        self.global_transform = Some(Arc::new(hook));
        self
    }

    pub fn with_geoip(mut self, enabled: bool, db_dir: Option<PathBuf>) -> Self {
        self.geoip = enabled;
        self.maxmind_db_dir = db_dir;
        self
    }

    pub fn with_original_line(mut self, enabled: bool) -> Self {
        self.original_line = enabled;
        self
    }

    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Keep only groups that declare a source rule whose text matches `rule`.
    pub fn whitelist(mut self, rule: &Regex) -> Self {
        self.groups
            .retain(|g| g.source().map(|s| rule.is_match(s.as_str())).unwrap_or(false));
        self
    }

    /// Remove groups whose source rule text matches `rule`.
    pub fn blacklist(mut self, rule: &Regex) -> Self {
        self.groups
            .retain(|g| !g.source().map(|s| rule.is_match(s.as_str())).unwrap_or(false));
        self
    }

    pub fn groups(&self) -> &[Arc<PatternGroup>] {
        &self.groups
    }

    pub fn date_formats(&self) -> &[DateFormat] {
        &self.date_formats
    }

    pub fn autohash(&self) -> Option<&Regex> {
        self.autohash.as_ref()
    }

    pub fn global_transform(&self) -> Option<&dyn GlobalTransform> {
        self.global_transform.as_deref()
    }

    pub fn geoip_enabled(&self) -> bool {
        self.geoip
    }

    pub fn maxmind_db_dir(&self) -> Option<&PathBuf> {
        self.maxmind_db_dir.as_ref()
    }

    pub fn original_line(&self) -> bool {
        self.original_line
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn pattern_count(&self) -> usize {
        self.groups.iter().map(|g| g.patterns().len()).sum()
    }
}

impl fmt::Debug for ConfigSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigSnapshot")
            .field("groups", &self.groups)
            .field("date_formats", &self.date_formats)
            .field("autohash", &self.autohash.as_ref().map(Regex::as_str))
            .field("global_transform", &self.global_transform.is_some())
            .field("geoip", &self.geoip)
            .field("maxmind_db_dir", &self.maxmind_db_dir)
            .field("original_line", &self.original_line)
            .field("debug", &self.debug)
            .finish()
    }
}
