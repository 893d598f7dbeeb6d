//! Replication lag sources.

use crate::config::ReplicationLinkConfig;
use crate::core::{Error, RegionId, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Measures the current lag of one replication link.
#[async_trait]
pub trait LagSampler: Send + Sync {
    /// Current lag in milliseconds.
    async fn sample(&self, link: &ReplicationLinkConfig) -> Result<u64>;

    fn name(&self) -> &str {
        "sampler"
    }
}

/// Sampler returning preset lags, for tests and dry runs.
///
/// Links without an entry report `default_lag_ms`.
#[derive(Debug, Default)]
pub struct FixedLagSampler {
    lags: RwLock<HashMap<(RegionId, RegionId), Option<u64>>>,
    default_lag_ms: u64,
}

impl FixedLagSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lag reported for links without an entry.
    pub fn with_default_lag(mut self, lag_ms: u64) -> Self {
        self.default_lag_ms = lag_ms;
        self
    }

    /// Set the lag of one link.
    pub fn set(&self, source: &str, target: &str, lag_ms: u64) {
        self.lags
            .write()
            .insert((source.to_string(), target.to_string()), Some(lag_ms));
    }

    /// Make sampling of one link fail.
    pub fn fail(&self, source: &str, target: &str) {
        self.lags
            .write()
            .insert((source.to_string(), target.to_string()), None);
    }
}

#[async_trait]
impl LagSampler for FixedLagSampler {
    async fn sample(&self, link: &ReplicationLinkConfig) -> Result<u64> {
        let key = (link.source.clone(), link.target.clone());
        match self.lags.read().get(&key) {
            Some(Some(lag)) => Ok(*lag),
            Some(None) => Err(Error::Probe(format!(
                "lag unavailable for {}->{}",
                link.source, link.target
            ))),
            None => Ok(self.default_lag_ms),
        }
    }

    fn name(&self) -> &str {
        "fixed"
    }
}
