use std::sync::atomic::{AtomicU64, Ordering};
use serde::Serialize;

/// Which path produced a completed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinePath {
    /// Structured JSON fast path
    Json,
    /// A pattern matched and the record was kept
    Matched,
    /// Raw fallback record (no match, disabled or exhausted)
    Fallback,
}

/// Error categories for metrics recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricErrorType {
    /// Processing panicked (caught via catch_unwind)
    Panic,
    /// Line exceeded MAX_LINE_SIZE
    TooLarge,
    /// A user hook failed or panicked and was bypassed
    Hook,
}

/// Forces the wrapped data onto its own 64-byte cache line so counters
/// updated from different cores do not share a line.
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct CacheAligned<T>(pub T);

/// Per-path counters (hottest path - updated per logical line)
#[derive(Debug, Default)]
pub struct PathMetrics {
    pub json: AtomicU64,
    pub matched: AtomicU64,
    pub fallback: AtomicU64,
}

/// Outcomes that produce no kept pattern record
#[derive(Debug, Default)]
pub struct OutcomeMetrics {
    pub dropped: AtomicU64,
    pub empty: AtomicU64,
    /// Lines short-circuited because their source exhausted its budget
    pub sticky: AtomicU64,
}

#[derive(Debug, Default)]
pub struct TotalMetrics {
    pub time_nanos: AtomicU64,
    pub count: AtomicU64,
}

#[derive(Debug, Default)]
pub struct ErrorMetrics {
    pub panic: AtomicU64,
    pub too_large: AtomicU64,
    pub hook: AtomicU64,
}

/// Source cache lifecycle
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub sweeps: AtomicU64,
    pub reloads: AtomicU64,
    pub promotions: AtomicU64,
}

/// Counters for line processing.
///
/// Each group sits on its own cache line via [`CacheAligned`]. All
/// operations use `Ordering::Relaxed`; `snapshot()` is not transactional
/// across fields, which is fine for observability.
#[derive(Debug, Default)]
pub struct ParsingMetrics {
    /// Group 1: path counters (HOTTEST PATH)
    pub paths: CacheAligned<PathMetrics>,

    /// Group 2: dropped / empty / sticky outcomes
    pub outcomes: CacheAligned<OutcomeMetrics>,

    /// Group 3: aggregate timing
    pub totals: CacheAligned<TotalMetrics>,

    /// Group 4: error counters
    pub errors: CacheAligned<ErrorMetrics>,

    /// Group 5: cache sweeps, reloads and reorderings
    pub cache: CacheAligned<CacheMetrics>,
}

impl ParsingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed line. Called once per logical line.
    #[inline]
    pub fn record_line(&self, path: LinePath, time_nanos: u64) {
        self.totals.0.count.fetch_add(1, Ordering::Relaxed);
        self.totals.0.time_nanos.fetch_add(time_nanos, Ordering::Relaxed);

        match path {
            LinePath::Json => self.paths.0.json.fetch_add(1, Ordering::Relaxed),
            LinePath::Matched => self.paths.0.matched.fetch_add(1, Ordering::Relaxed),
            LinePath::Fallback => self.paths.0.fallback.fetch_add(1, Ordering::Relaxed),
        };
    }

    #[inline]
    pub fn record_error(&self, error_type: MetricErrorType) {
        match error_type {
            MetricErrorType::Panic => self.errors.0.panic.fetch_add(1, Ordering::Relaxed),
            MetricErrorType::TooLarge => self.errors.0.too_large.fetch_add(1, Ordering::Relaxed),
            MetricErrorType::Hook => self.errors.0.hook.fetch_add(1, Ordering::Relaxed),
        };
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.outcomes.0.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_empty(&self) {
        self.outcomes.0.empty.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sticky(&self) {
        self.outcomes.0.sticky.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_promotion(&self) {
        self.cache.0.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep(&self) {
        self.cache.0.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reload(&self) {
        self.cache.0.reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_lines = self.totals.0.count.load(Ordering::Relaxed);
        let total_time_ns = self.totals.0.time_nanos.load(Ordering::Relaxed);
        let json_lines = self.paths.0.json.load(Ordering::Relaxed);
        let matched_lines = self.paths.0.matched.load(Ordering::Relaxed);
        let fallback_lines = self.paths.0.fallback.load(Ordering::Relaxed);

        let structured = json_lines + matched_lines;
        let classified = structured + fallback_lines;

        MetricsSnapshot {
            json_lines,
            matched_lines,
            fallback_lines,

            dropped_lines: self.outcomes.0.dropped.load(Ordering::Relaxed),
            empty_lines: self.outcomes.0.empty.load(Ordering::Relaxed),
            sticky_lines: self.outcomes.0.sticky.load(Ordering::Relaxed),

            total_lines,
            avg_line_time_us: if total_lines > 0 {
                (total_time_ns as f64 / total_lines as f64) / 1000.0
            } else {
                0.0
            },
            structured_rate: if classified > 0 {
                structured as f64 / classified as f64
            } else {
                1.0
            },

            panics: self.errors.0.panic.load(Ordering::Relaxed),
            lines_too_large: self.errors.0.too_large.load(Ordering::Relaxed),
            hook_failures: self.errors.0.hook.load(Ordering::Relaxed),

            cache_sweeps: self.cache.0.sweeps.load(Ordering::Relaxed),
            reloads: self.cache.0.reloads.load(Ordering::Relaxed),
            promotions: self.cache.0.promotions.load(Ordering::Relaxed),
        }
    }
}

/// A read-only, serializable snapshot of [`ParsingMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    // Paths
    pub json_lines: u64,
    pub matched_lines: u64,
    pub fallback_lines: u64,

    // Outcomes
    pub dropped_lines: u64,
    pub empty_lines: u64,
    pub sticky_lines: u64,

    // Performance
    pub total_lines: u64,
    pub avg_line_time_us: f64,
    pub structured_rate: f64,

    // Errors
    pub panics: u64,
    pub lines_too_large: u64,
    pub hook_failures: u64,

    // Cache
    pub cache_sweeps: u64,
    pub reloads: u64,
    pub promotions: u64,
}
