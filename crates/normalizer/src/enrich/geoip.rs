//! GeoIP — lookup seam and record enrichment.
//!
//! The database reader itself is an external collaborator: anything that
//! implements [`GeoLocator`] can be plugged in. This module owns the
//! enable/disable decision at startup and the shape of the `geoip`
//! attribute written onto records.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::parser::coerce::{is_truthy, string_form};
use crate::parser::record::Record;

/// File name of the city database inside the database directory.
pub const GEOIP_DB_FILE: &str = "GeoIPCity.dat";
/// Attribute written on a successful lookup.
pub const GEOIP_FIELD: &str = "geoip";

#[derive(Debug, Error)]
pub enum GeoIpError {
    #[error("GeoIP database not found at {0}")]
    MissingDatabase(PathBuf),

    #[error("failed to load GeoIP database: {0}")]
    Load(String),
}

/// Result of a successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoLocation {
    pub longitude: f64,
    pub latitude: f64,
    /// Raw lookup result as returned by the database.
    pub info: Value,
}

pub trait GeoLocator: Send + Sync {
    fn locate(&self, address: &str) -> Option<GeoLocation>;
}

/// Opens a database file into a locator.
pub trait GeoDatabaseLoader {
    fn open(&self, path: &Path) -> Result<Arc<dyn GeoLocator>, GeoIpError>;
}

pub fn database_path(dir: &Path) -> PathBuf {
    dir.join(GEOIP_DB_FILE)
}

/// Resolve the locator used for enrichment.
///
/// Returns `None` when GeoIP is disabled, no loader is available, or the
/// database cannot be opened. Failures only disable enrichment.
pub fn init_geoip(
    enabled: bool,
    db_dir: Option<&Path>,
    loader: Option<&dyn GeoDatabaseLoader>,
) -> Option<Arc<dyn GeoLocator>> {
    if !enabled {
        return None;
    }

    let Some(dir) = db_dir else {
        warn!("GeoIP enabled but no database directory configured; enrichment disabled");
        return None;
    };
    let path = database_path(dir);

    let opened = if !path.exists() {
        Err(GeoIpError::MissingDatabase(path.clone()))
    } else {
        match loader {
            Some(loader) => loader.open(&path),
            None => Err(GeoIpError::Load("no database reader available".to_string())),
        }
    };

    match opened {
        Ok(locator) => {
            info!(path = %path.display(), "GeoIP database loaded");
            Some(locator)
        }
        Err(e) => {
            warn!(error = %e, "GeoIP enrichment disabled");
            None
        }
    }
}

/// Look up the value currently stored under `field` and attach the result.
/// Returns true when a `geoip` attribute was written.
pub fn enrich(record: &mut Record, field: &str, locator: &dyn GeoLocator) -> bool {
    let address = match record.get(field) {
        Some(value) if is_truthy(value) => string_form(value),
        _ => return false,
    };

    match locator.locate(&address) {
        Some(location) => {
            record.insert(
                GEOIP_FIELD,
                json!({
                    "location": [location.longitude, location.latitude],
                    "info": location.info,
                }),
            );
            true
        }
        None => false,
    }
}
