//! Hooks — user-supplied predicates and transforms attached to patterns.
//!
//! Every hook returns a `Result`, and any hook may also panic. Call sites
//! never invoke a hook directly: they go through [`fail_open`], which
//! isolates the call, logs the failure and substitutes the documented
//! default outcome.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use regex::Regex;
use thiserror::Error;
use tracing::warn;

use super::model::Pattern;
use crate::parser::metrics::{MetricErrorType, ParsingMetrics};
use crate::parser::record::Record;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HookError {
    #[error("hook failed: {0}")]
    Failed(String),
}

impl HookError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HookError::Failed(msg.into())
    }
}

/// Input-accept / input-reject predicate over the raw logical line.
pub trait LinePredicate: Send + Sync {
    fn test(&self, line: &str) -> Result<bool, HookError>;
}

impl<F> LinePredicate for F
where
    F: Fn(&str) -> Result<bool, HookError> + Send + Sync,
{
    fn test(&self, line: &str) -> Result<bool, HookError> {
        self(line)
    }
}

/// Predicate backed by a regex, as declared in pattern files.
#[derive(Debug, Clone)]
pub struct RegexPredicate(pub Regex);

impl LinePredicate for RegexPredicate {
    fn test(&self, line: &str) -> Result<bool, HookError> {
        Ok(self.0.is_match(line))
    }
}

/// Per-pattern mutation of a freshly extracted record.
pub trait RecordTransform: Send + Sync {
    fn transform(&self, record: &mut Record) -> Result<(), HookError>;
}

impl<F> RecordTransform for F
where
    F: Fn(&mut Record) -> Result<(), HookError> + Send + Sync,
{
    fn transform(&self, record: &mut Record) -> Result<(), HookError> {
        self(record)
    }
}

/// Per-pattern keep/drop decision. `false` drops the record.
pub trait RecordFilter: Send + Sync {
    fn keep(&self, record: &Record, pattern: &Pattern) -> Result<bool, HookError>;
}

impl<F> RecordFilter for F
where
    F: Fn(&Record, &Pattern) -> Result<bool, HookError> + Send + Sync,
{
    fn keep(&self, record: &Record, pattern: &Pattern) -> Result<bool, HookError> {
        self(record, pattern)
    }
}

/// Invoked with `(source, record)` on every finalized or fallback record.
pub trait GlobalTransform: Send + Sync {
    fn apply(&self, source: &str, record: &mut Record) -> Result<(), HookError>;
}

impl<F> GlobalTransform for F
where
    F: Fn(&str, &mut Record) -> Result<(), HookError> + Send + Sync,
{
    fn apply(&self, source: &str, record: &mut Record) -> Result<(), HookError> {
        self(source, record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    InputFilter,
    InputDrop,
    Transform,
    Filter,
    GlobalTransform,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::InputFilter => "input_filter",
            HookKind::InputDrop => "input_drop",
            HookKind::Transform => "transform",
            HookKind::Filter => "filter",
            HookKind::GlobalTransform => "global_transform",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run a hook, returning `fallback` if it errors or panics.
///
/// `owner` names the pattern (or source, for the global transform) in the
/// warning. Side effects performed before the failure are kept.
pub fn fail_open<T>(
    kind: HookKind,
    owner: &str,
    fallback: T,
    metrics: &ParsingMetrics,
    call: impl FnOnce() -> Result<T, HookError>,
) -> T {
    let error = match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => return value,
        Ok(Err(e)) => e.to_string(),
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };

    warn!(hook = %kind, owner = owner, error = %error, "Hook failed; continuing with default");
    metrics.record_error(MetricErrorType::Hook);
    fallback
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
