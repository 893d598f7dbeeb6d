//! Lock-free routing counters.
//!
//! The set of regions is fixed at startup, so per-region counters are
//! allocated once and incremented without any lock on the hot path.

use crate::core::RegionId;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric (monotonically increasing).
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// One counter per region.
#[derive(Debug, Default)]
pub struct RegionCounters {
    counters: HashMap<RegionId, Counter>,
}

impl RegionCounters {
    /// Allocate counters for a fixed set of regions.
    pub fn new<'a>(regions: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            counters: regions
                .into_iter()
                .map(|id| (id.to_string(), Counter::new()))
                .collect(),
        }
    }

    /// Increment a region's counter; unknown regions are ignored.
    pub fn inc(&self, region: &str) -> bool {
        match self.counters.get(region) {
            Some(counter) => {
                counter.inc();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, region: &str) -> u64 {
        self.counters.get(region).map(|c| c.get()).unwrap_or(0)
    }

    /// Sum over all regions.
    pub fn total(&self) -> u64 {
        self.counters.values().map(|c| c.get()).sum()
    }

    /// Sorted copy of all values.
    pub fn values(&self) -> BTreeMap<RegionId, u64> {
        self.counters
            .iter()
            .map(|(id, c)| (id.clone(), c.get()))
            .collect()
    }

    /// Export in Prometheus text format.
    pub fn export_prometheus(&self, name: &str, help: &str) -> String {
        let mut output = String::new();
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} counter\n", name));
        for (region, value) in self.values() {
            output.push_str(&format!("{}{{region=\"{}\"}} {}\n", name, region, value));
        }
        output
    }
}
