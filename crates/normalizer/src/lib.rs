// Domain-driven module structure for the log normalizer.

// Core infrastructure
pub mod conf;
pub mod parser;
pub mod pattern;

// Domain modules
pub mod enrich;
pub mod multiline;
pub mod runtime;
pub mod service;
