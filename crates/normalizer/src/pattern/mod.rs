//! Pattern module — pattern model, user hooks, pattern-file loading and the
//! immutable config snapshot consumed by the parser.

pub mod file;
pub mod hooks;
pub mod model;
pub mod snapshot;

pub use file::{load_pattern_files, PatternFile};
pub use hooks::{
    GlobalTransform, HookError, HookKind, LinePredicate, RecordFilter, RecordTransform,
    RegexPredicate,
};
pub use model::{FieldSpec, Pattern, PatternError, PatternGroup};
pub use snapshot::ConfigSnapshot;
