//! Multiline module — per-source gates that join continuation lines into
//! one logical line before it reaches the parser.

pub mod gate;

pub use gate::{gate_for, gate_key, BlockStartGate, MultiLineGate, PassthroughGate};
