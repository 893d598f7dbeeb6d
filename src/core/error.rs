//! Error types for the federation router.

use thiserror::Error;

/// Result type alias for federation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while routing, probing, or failing over.
#[derive(Error, Debug)]
pub enum Error {
    // Startup errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Routing errors
    #[error("No healthy region available (sovereignty: {sovereignty:?}, geo: {geo:?})")]
    NoHealthyRegion {
        sovereignty: Option<String>,
        geo: Option<String>,
    },

    #[error("Region not found: {0}")]
    RegionNotFound(String),

    // Failover errors
    #[error("No failover pair configured for region {0}")]
    FailoverPairMissing(String),

    #[error("Secondary region {secondary} for {primary} is unhealthy")]
    SecondaryUnhealthy { primary: String, secondary: String },

    #[error("Failover already in progress for region {region} (state: {state})")]
    FailoverInProgress { region: String, state: String },

    #[error("Cannot {op} region {region} while {from}")]
    InvalidTransition {
        region: String,
        from: String,
        op: String,
    },

    // Health errors
    #[error("Health probe for {region} timed out after {timeout_ms}ms")]
    HealthProbeTimeout { region: String, timeout_ms: u64 },

    #[error("Probe error: {0}")]
    Probe(String),

    // Replication errors
    #[error("Replication lag {source_region}->{target_region} is {lag_ms}ms (max {max_lag_ms}ms)")]
    ReplicationLagExceeded {
        source_region: String,
        target_region: String,
        lag_ms: u64,
        max_lag_ms: u64,
    },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a configuration error from anything printable.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Errors that must stop the process from starting.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
