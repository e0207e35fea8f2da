//! Service module — the parser worker task and its handle.

pub mod worker;

pub use worker::{Command, ParserHandle, ParserService, ServiceConfig, ServiceError};
