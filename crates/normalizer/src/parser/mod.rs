//! Line classification, pattern matching and adaptive per-source state.
//!
//! # Architecture
//!
//! - `record.rs`: the open attribute set produced per line
//! - `coerce.rs`: numeric/string coercion of captures
//! - `classify.rs`: JSON fast path vs. pattern path
//! - `engine.rs`: trying one pattern against one line
//! - `cache.rs`: per-source candidate order with bubble-up
//! - `budget.rs`: per-source consecutive-failure counters
//! - `processor.rs`: per-line orchestration
//! - `metrics.rs`: processing counters
//!
//! # Safety Guarantees
//!
//! - Hook failures never abort a line (fail-open guard)
//! - Panic safety (catch_unwind around each line)
//! - Line size limits (prevent DoS)

pub mod budget;
pub mod cache;
pub mod classify;
pub mod coerce;
pub mod engine;
pub mod metrics;
pub mod model;
pub mod processor;
pub mod record;

pub use metrics::{MetricsSnapshot, ParsingMetrics};
pub use model::{MatchOutcome, ParseError, ParseOutcome, ParsedLine};
pub use processor::{LineProcessor, ProcessorSettings};
pub use record::Record;

// Constants
pub const MAX_LINE_SIZE: usize = 1_048_576; // 1MB
