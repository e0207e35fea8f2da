//! Boot — logging init, config load, pattern load, processor creation.
//!
//! No GeoIP database reader ships with the binary. `boot` starts with
//! enrichment off; an embedder that links a reader passes its
//! [`GeoDatabaseLoader`] to `boot_with_geoip`. The database is opened once
//! here, and pattern reloads keep the locator opened at boot.

use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::conf::AgentConfig;
use crate::enrich::geoip::{init_geoip, GeoDatabaseLoader};
use crate::parser::{LineProcessor, ProcessorSettings};
use crate::pattern::{load_pattern_files, ConfigSnapshot};

/// Initialise the tracing / logging subsystem.
///
/// Logs go to stderr; stdout carries the normalized records.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "normalizer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load pattern files and apply the agent-level overrides.
///
/// Used at boot and again on every reload request.
pub fn load_snapshot(config: &AgentConfig) -> Result<ConfigSnapshot, Box<dyn std::error::Error>> {
    let mut snapshot = load_pattern_files(&config.patterns_files)?;

    if let Some(rule) = config.whitelist.as_deref() {
        snapshot = snapshot.whitelist(&Regex::new(rule)?);
    }
    if let Some(rule) = config.blacklist.as_deref() {
        snapshot = snapshot.blacklist(&Regex::new(rule)?);
    }

    let geoip_enabled = config.geoip_enabled || snapshot.geoip_enabled();
    let db_dir = config
        .maxmind_db_dir
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| snapshot.maxmind_db_dir().cloned());

    Ok(snapshot.with_geoip(geoip_enabled, db_dir))
}

/// Build the processor for a loaded snapshot, opening the GeoIP database
/// through `loader` when the snapshot enables it.
pub fn build_processor(
    config: &AgentConfig,
    snapshot: ConfigSnapshot,
    loader: Option<&dyn GeoDatabaseLoader>,
) -> LineProcessor {
    let locator = init_geoip(
        snapshot.geoip_enabled(),
        snapshot.maxmind_db_dir().map(PathBuf::as_path),
        loader,
    );

    let settings = ProcessorSettings {
        max_training_lines: config.max_training_lines,
        pattern_matching_enabled: config.pattern_matching_enabled,
    };
    LineProcessor::new(snapshot, settings).with_geoip(locator)
}

/// Load config and patterns, then build the shared line processor.
///
/// Returns `(processor, config)` on success. A pattern set that fails to
/// load here is fatal.
pub fn boot() -> Result<(Arc<LineProcessor>, AgentConfig), Box<dyn std::error::Error>> {
    boot_with_geoip(None)
}

/// Same as [`boot`], with a reader for the GeoIP city database.
pub fn boot_with_geoip(
    loader: Option<&dyn GeoDatabaseLoader>,
) -> Result<(Arc<LineProcessor>, AgentConfig), Box<dyn std::error::Error>> {
    info!("Starting log normalizer v{}", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::load()?;
    config.validate().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;
    info!(
        "Pattern matching: enabled={}, max_training_lines={}",
        config.pattern_matching_enabled, config.max_training_lines
    );
    info!(
        "Multiline grouping: enabled={}, timeout={}ms, max_lines={}",
        config.multiline.enabled, config.multiline.timeout_ms, config.multiline.max_lines
    );

    let snapshot = load_snapshot(&config).map_err(|e| {
        error!("Failed to load pattern files: {}", e);
        e
    })?;

    let processor = Arc::new(build_processor(&config, snapshot, loader));
    info!("Initialized line processor");

    Ok((processor, config))
}
