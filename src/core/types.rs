//! Common types used across the router modules.

use serde::{Deserialize, Serialize};

/// Identifier of a configured region (e.g. `eu-west-1`).
pub type RegionId = String;

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Latency percentiles in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencyPercentiles {
    /// Percentiles collapsed to a single observed sample.
    pub fn from_sample(ms: f64) -> Self {
        Self {
            p50_ms: ms,
            p95_ms: ms,
            p99_ms: ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sample() {
        let latency = LatencyPercentiles::from_sample(42.0);
        assert_eq!(latency.p50_ms, 42.0);
        assert_eq!(latency.p99_ms, 42.0);
    }

    #[test]
    fn test_now_is_monotone_enough() {
        let a = now();
        let b = now();
        assert!(b >= a);
    }
}
