use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use super::hooks::{LinePredicate, RecordFilter, RecordTransform, RegexPredicate};
use crate::enrich::date::DateFormat;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("failed to read pattern file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pattern file {origin}: {source}")]
    Toml {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid regex in {context}: {source}")]
    InvalidRegex {
        context: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid field spec: {0:?}")]
    InvalidField(String),
}

pub(crate) fn compile_regex(pattern: &str, context: &str) -> Result<Regex, PatternError> {
    Regex::new(pattern).map_err(|source| PatternError::InvalidRegex {
        context: context.to_string(),
        source,
    })
}

/// A declared output field: `name` or `name:typeHint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    /// Hint requests `number`: string values are forced numeric.
    pub to_number: bool,
    /// Hint requests `string`: numeric values are turned back into text.
    pub to_string: bool,
}

impl FieldSpec {
    pub fn parse(spec: &str) -> Result<Self, PatternError> {
        let (name, hint) = match spec.split_once(':') {
            Some((name, hint)) => (name.trim(), hint.trim()),
            None => (spec.trim(), ""),
        };
        if name.is_empty() {
            return Err(PatternError::InvalidField(spec.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            to_number: hint.contains("number"),
            to_string: hint.contains("string"),
        })
    }
}

/// A single regex extractor with its field table and optional hooks.
///
/// Field specs are parsed once on construction; the pattern is immutable
/// once it is part of a snapshot.
#[derive(Clone)]
pub struct Pattern {
    type_name: Option<String>,
    regex: Regex,
    fields: Vec<FieldSpec>,
    date_format: Option<DateFormat>,
    geoip_field: Option<String>,
    input_filter: Option<Arc<dyn LinePredicate>>,
    input_drop: Option<Arc<dyn LinePredicate>>,
    transform: Option<Arc<dyn RecordTransform>>,
    filter: Option<Arc<dyn RecordFilter>>,
}

impl Pattern {
    pub fn new<I, S>(regex: &str, fields: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let regex = compile_regex(regex, "pattern")?;
        let fields = fields
            .into_iter()
            .map(|f| FieldSpec::parse(f.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            type_name: None,
            regex,
            fields,
            date_format: None,
            geoip_field: None,
            input_filter: None,
            input_drop: None,
            transform: None,
            filter: None,
        })
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn with_date_format(mut self, format: &str) -> Self {
        self.date_format = Some(DateFormat::from_moment(format));
        self
    }

    pub fn with_geoip_field(mut self, field: impl Into<String>) -> Self {
        self.geoip_field = Some(field.into());
        self
    }

    /// Lines for which `predicate` is false are dropped after matching.
    pub fn with_input_filter(mut self, predicate: impl LinePredicate + 'static) -> Self {
        self.input_filter = Some(Arc::new(predicate));
        self
    }

    /// Lines for which `predicate` is true are dropped after matching.
    pub fn with_input_drop(mut self, predicate: impl LinePredicate + 'static) -> Self {
        self.input_drop = Some(Arc::new(predicate));
        self
    }

    pub(crate) fn with_input_filter_regex(self, regex: Regex) -> Self {
        self.with_input_filter(RegexPredicate(regex))
    }

    pub(crate) fn with_input_drop_regex(self, regex: Regex) -> Self {
        self.with_input_drop(RegexPredicate(regex))
    }

    pub fn with_transform(mut self, transform: impl RecordTransform + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn with_filter(mut self, filter: impl RecordFilter + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// Name used in logs: the type, or the regex when untyped.
    pub fn label(&self) -> &str {
        self.type_name.as_deref().unwrap_or_else(|| self.regex.as_str())
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn date_format(&self) -> Option<&DateFormat> {
        self.date_format.as_ref()
    }

    pub fn geoip_field(&self) -> Option<&str> {
        self.geoip_field.as_deref()
    }

    pub fn input_filter(&self) -> Option<&dyn LinePredicate> {
        self.input_filter.as_deref()
    }

    pub fn input_drop(&self) -> Option<&dyn LinePredicate> {
        self.input_drop.as_deref()
    }

    pub fn transform(&self) -> Option<&dyn RecordTransform> {
        self.transform.as_deref()
    }

    pub fn filter(&self) -> Option<&dyn RecordFilter> {
        self.filter.as_deref()
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("type_name", &self.type_name)
            .field("regex", &self.regex.as_str())
            .field("fields", &self.fields)
            .field("date_format", &self.date_format.as_ref().map(DateFormat::source))
            .field("geoip_field", &self.geoip_field)
            .field("input_filter", &self.input_filter.is_some())
            .field("input_drop", &self.input_drop.is_some())
            .field("transform", &self.transform.is_some())
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// Patterns sharing a source rule and a multi-line block-start marker.
#[derive(Debug, Clone, Default)]
pub struct PatternGroup {
    source: Option<Regex>,
    block_start: Option<Regex>,
    type_name: Option<String>,
    patterns: Vec<Pattern>,
}

impl PatternGroup {
    pub fn new(patterns: Vec<Pattern>) -> Self {
        Self {
            patterns,
            ..Self::default()
        }
    }

    pub fn with_source(mut self, source: &str) -> Result<Self, PatternError> {
        self.source = Some(compile_regex(source, "group source")?);
        Ok(self)
    }

    pub fn with_block_start(mut self, block_start: &str) -> Result<Self, PatternError> {
        self.block_start = Some(compile_regex(block_start, "group block_start")?);
        Ok(self)
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// A group without a source rule applies to every source.
    pub fn matches_source(&self, source: &str) -> bool {
        self.source.as_ref().map(|r| r.is_match(source)).unwrap_or(true)
    }

    pub fn source(&self) -> Option<&Regex> {
        self.source.as_ref()
    }

    pub fn block_start(&self) -> Option<&Regex> {
        self.block_start.as_ref()
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }
}
