use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio::time::{Duration, Instant};

use crate::conf::MultilineConfig;
use crate::pattern::PatternGroup;

/// Marker used when no group for the source declares one: a new record
/// starts on any line beginning with non-whitespace.
pub const DEFAULT_BLOCK_START: &str = r"^\S+";
/// Gate key used for lines without a source name.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Reassembles physical lines into logical lines for one source.
///
/// `add` returns a completed logical line when the new physical line closes
/// the previous block; `check_timeout` and `flush` release whatever is still
/// pending.
pub trait MultiLineGate: Send + Sync {
    fn add(&mut self, line: String) -> Option<String>;

    fn check_timeout(&mut self) -> Option<String>;

    fn flush(&mut self) -> Option<String>;

    fn has_pending(&self) -> bool;
}

enum GroupAction {
    FlushAndStartNew,
    AddToCurrent,
    StartNew,
}

/// Groups a block-start line with the continuation lines that follow it.
///
/// - A line matching the block-start marker closes the pending block
/// - Other lines are appended to the pending block, joined with `\n`
/// - `max_lines` caps a block; the next line starts a new one
/// - An idle block is released by `check_timeout()` after `timeout`
pub struct BlockStartGate {
    block_start: Regex,
    pending: Option<Vec<String>>,
    timeout: Duration,
    last_update: Option<Instant>,
    max_lines: usize,
}

impl BlockStartGate {
    pub fn new(block_start: Regex, config: &MultilineConfig) -> Self {
        Self {
            block_start,
            pending: None,
            timeout: Duration::from_millis(config.timeout_ms),
            last_update: None,
            max_lines: config.max_lines.max(1),
        }
    }

    pub fn block_start(&self) -> &Regex {
        &self.block_start
    }

    fn start_new_block(&mut self, line: String) {
        self.pending = Some(vec![line]);
        self.last_update = Some(Instant::now());
    }
}

impl MultiLineGate for BlockStartGate {
    fn add(&mut self, line: String) -> Option<String> {
        if let Some(last) = self.last_update {
            if last.elapsed() > self.timeout {
                tracing::debug!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "multiline: timeout expired, flushing pending block"
                );
                let flushed = self.flush();
                self.start_new_block(line);
                return flushed;
            }
        }

        let action = match self.pending {
            Some(ref lines) => {
                if self.block_start.is_match(&line) {
                    GroupAction::FlushAndStartNew
                } else if lines.len() >= self.max_lines {
                    tracing::debug!(
                        max_lines = self.max_lines,
                        "multiline: max_lines limit reached, flushing"
                    );
                    GroupAction::FlushAndStartNew
                } else {
                    GroupAction::AddToCurrent
                }
            }
            None => GroupAction::StartNew,
        };

        match action {
            GroupAction::FlushAndStartNew => {
                let complete = self.flush();
                self.start_new_block(line);
                complete
            }
            GroupAction::AddToCurrent => {
                if let Some(ref mut lines) = self.pending {
                    lines.push(line);
                    self.last_update = Some(Instant::now());
                }
                None
            }
            GroupAction::StartNew => {
                self.start_new_block(line);
                None
            }
        }
    }

    fn check_timeout(&mut self) -> Option<String> {
        match self.last_update {
            Some(last) if last.elapsed() > self.timeout => {
                tracing::trace!("multiline: proactive timeout flush");
                self.flush()
            }
            _ => None,
        }
    }

    fn flush(&mut self) -> Option<String> {
        self.last_update = None;
        self.pending.take().map(|lines| lines.join("\n"))
    }

    fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Emits every physical line as its own logical line.
#[derive(Debug, Default)]
pub struct PassthroughGate;

impl MultiLineGate for PassthroughGate {
    fn add(&mut self, line: String) -> Option<String> {
        Some(line)
    }

    fn check_timeout(&mut self) -> Option<String> {
        None
    }

    fn flush(&mut self) -> Option<String> {
        None
    }

    fn has_pending(&self) -> bool {
        false
    }
}

/// Key under which a source's gate is kept.
pub fn gate_key(source: &str) -> &str {
    if source.is_empty() {
        UNKNOWN_SOURCE
    } else {
        source
    }
}

fn default_block_start() -> Option<&'static Regex> {
    static DEFAULT: OnceLock<Option<Regex>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| Regex::new(DEFAULT_BLOCK_START).ok())
        .as_ref()
}

/// Block-start marker of the first group matching `source`, or the default.
pub fn block_start_for(source: &str, groups: &[Arc<PatternGroup>]) -> Option<Regex> {
    let key = gate_key(source);
    groups
        .iter()
        .find(|g| g.matches_source(key))
        .and_then(|g| g.block_start().cloned())
        .or_else(|| default_block_start().cloned())
}

/// Build the gate for a newly seen source.
pub fn gate_for(
    source: &str,
    groups: &[Arc<PatternGroup>],
    config: &MultilineConfig,
) -> Box<dyn MultiLineGate> {
    if !config.enabled {
        return Box::new(PassthroughGate);
    }
    match block_start_for(source, groups) {
        Some(marker) => Box::new(BlockStartGate::new(marker, config)),
        None => Box::new(PassthroughGate),
    }
}
