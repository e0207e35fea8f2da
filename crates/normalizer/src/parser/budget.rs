use dashmap::DashMap;

/// Default number of consecutive unmatched lines tolerated per source.
pub const DEFAULT_TRAINING_LINES: u32 = 100;

/// Consecutive-failure counters per source, clamped at `ceiling`.
///
/// A source whose counter reaches the ceiling is sticky-disabled: callers
/// skip pattern matching for it until [`clear`](Self::clear).
#[derive(Debug)]
pub struct FailureBudget {
    counters: DashMap<String, u32>,
    ceiling: u32,
}

impl FailureBudget {
    pub fn new(ceiling: u32) -> Self {
        Self {
            counters: DashMap::new(),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Current counter; unseen sources read as zero.
    pub fn failures(&self, source: &str) -> u32 {
        self.counters.get(source).map(|c| *c.value()).unwrap_or(0)
    }

    pub fn is_exhausted(&self, source: &str) -> bool {
        self.failures(source) >= self.ceiling
    }

    /// Count one more unmatched line. Returns the new value.
    pub fn record_failure(&self, source: &str) -> u32 {
        let ceiling = self.ceiling;
        let mut entry = self.counters.entry(source.to_string()).or_insert(0);
        *entry = entry.saturating_add(1).min(ceiling);
        *entry
    }

    pub fn record_success(&self, source: &str) {
        if let Some(mut entry) = self.counters.get_mut(source) {
            *entry = 0;
        }
    }

    /// Pin the counter at the ceiling.
    pub fn exhaust(&self, source: &str) {
        self.counters.insert(source.to_string(), self.ceiling);
    }

    pub fn exhausted_sources(&self) -> Vec<String> {
        self.counters
            .iter()
            .filter(|e| *e.value() >= self.ceiling)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn clear(&self) {
        self.counters.clear();
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl Default for FailureBudget {
    fn default() -> Self {
        Self::new(DEFAULT_TRAINING_LINES)
    }
}
