//! Configuration loading from JSON files.

use crate::config::schema::{FailoverDocument, FederationConfig};
use crate::core::{Error, Result};
use std::path::Path;
use tracing::{debug, info};

/// Reads federation configuration documents.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Parse a combined configuration document.
    pub fn from_json(json: &str) -> Result<FederationConfig> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("invalid configuration: {}", e)))
    }

    /// Load a combined configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<FederationConfig> {
        let path = path.as_ref();
        let raw = read(path)?;
        let config = Self::from_json(&raw)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), regions = config.regions.len(), "Loaded configuration");
        Ok(config)
    }

    /// Load a regions/settings file plus a separate failover document.
    ///
    /// The failover document replaces any pairs, geo preferences and
    /// replication links embedded in the first file.
    pub fn from_files(
        regions_path: impl AsRef<Path>,
        failover_path: impl AsRef<Path>,
    ) -> Result<FederationConfig> {
        let mut config = Self::from_file(regions_path)?;
        let failover_path = failover_path.as_ref();
        let raw = read(failover_path)?;
        let document: FailoverDocument = serde_json::from_str(&raw).map_err(|e| {
            Error::config(format!("{}: invalid failover document: {}", failover_path.display(), e))
        })?;
        debug!(
            path = %failover_path.display(),
            pairs = document.pairs.len(),
            geo_buckets = document.geo_preferences.len(),
            "Loaded failover document"
        );
        config.failover = document;
        Ok(config)
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))
}
