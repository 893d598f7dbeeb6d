//! Region health monitoring.
//!
//! Probes every active region, tracks consecutive failures and successes,
//! and emits edge-triggered `HealthEvent`s. Each region's `RegionHealth`
//! record is an immutable value swapped atomically, so readers on the
//! routing path never see a half-written record and never take a lock.

use crate::config::HealthConfig;
use crate::core::{now, Error, LatencyPercentiles, RegionId, Result, Timestamp};
use crate::health::probe::{HealthProbe, ProbeReport};
use crate::monitoring::{AlertSeverity, Notification, NotificationKind, Notifier};
use crate::region::{Region, RegionRegistry};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-region health state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionHealth {
    /// Region ID
    pub region_id: RegionId,
    /// Consecutive failed probes
    pub consecutive_failures: u32,
    /// Consecutive successful probes
    pub consecutive_successes: u32,
    /// Last probe time
    pub last_check: Option<Timestamp>,
    /// `consecutive_failures < failure_threshold`
    pub healthy: bool,
    /// A breach was emitted and no recovery since
    pub breached: bool,
    /// Latest load fraction
    pub load: f64,
    /// Latest latency percentiles
    pub latency: LatencyPercentiles,
    /// Reason of the last failed probe
    pub last_error: Option<String>,
}

impl RegionHealth {
    fn initial(region: &Region) -> Self {
        Self {
            region_id: region.id.clone(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check: None,
            healthy: true,
            breached: false,
            load: region.load,
            latency: region.latency,
            last_error: None,
        }
    }
}

/// Edge-triggered health transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum HealthEvent {
    /// Consecutive failures reached the failure threshold
    Breach {
        region: RegionId,
        consecutive_failures: u32,
        at: Timestamp,
    },
    /// Consecutive successes reached the success threshold after a breach
    Recovered {
        region: RegionId,
        consecutive_successes: u32,
        at: Timestamp,
    },
}

impl HealthEvent {
    pub fn region(&self) -> &str {
        match self {
            HealthEvent::Breach { region, .. } | HealthEvent::Recovered { region, .. } => region,
        }
    }

    pub fn is_breach(&self) -> bool {
        matches!(self, HealthEvent::Breach { .. })
    }
}

/// Health monitor for all active regions.
pub struct HealthMonitor {
    registry: Arc<RegionRegistry>,
    probe: Arc<dyn HealthProbe>,
    config: HealthConfig,
    records: HashMap<RegionId, ArcSwap<RegionHealth>>,
    notifier: Notifier,
    /// Serializes cycles so each record has a single writer
    cycle: tokio::sync::Mutex<()>,
}

impl HealthMonitor {
    /// Create a monitor over the registry's active regions.
    pub fn new(
        registry: Arc<RegionRegistry>,
        probe: Arc<dyn HealthProbe>,
        config: HealthConfig,
        notifier: Notifier,
    ) -> Self {
        let records = registry
            .active_regions()
            .map(|r| (r.id.clone(), ArcSwap::from_pointee(RegionHealth::initial(r))))
            .collect();
        Self {
            registry,
            probe,
            config,
            records,
            notifier,
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Check if a region is healthy. Unknown and inactive regions are not.
    pub fn is_healthy(&self, region_id: &str) -> bool {
        self.records
            .get(region_id)
            .map(|r| r.load().healthy)
            .unwrap_or(false)
    }

    /// Current record of a region.
    pub fn health(&self, region_id: &str) -> Option<Arc<RegionHealth>> {
        self.records.get(region_id).map(|r| r.load_full())
    }

    /// Current records of all monitored regions, sorted by id.
    pub fn all_health(&self) -> Vec<RegionHealth> {
        let mut all: Vec<RegionHealth> = self
            .records
            .values()
            .map(|r| r.load().as_ref().clone())
            .collect();
        all.sort_by(|a, b| a.region_id.cmp(&b.region_id));
        all
    }

    /// Latest load fraction of a region.
    pub fn current_load(&self, region_id: &str) -> Option<f64> {
        self.records.get(region_id).map(|r| r.load().load)
    }

    /// Latest latency percentiles of a region.
    pub fn current_latency(&self, region_id: &str) -> Option<LatencyPercentiles> {
        self.records.get(region_id).map(|r| r.load().latency)
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Probe one region without changing its state.
    ///
    /// Network failures and timeouts return `Ok(false)`; only an unknown
    /// region is an error.
    pub async fn check_region(&self, region_id: &str) -> Result<bool> {
        let region = self
            .registry
            .get_region(region_id)
            .ok_or_else(|| Error::RegionNotFound(region_id.to_string()))?;
        Ok(self.probe_region(region).await.is_ok())
    }

    async fn probe_region(&self, region: &Region) -> Result<ProbeReport> {
        match tokio::time::timeout(self.config.timeout(), self.probe.probe(region)).await {
            Ok(result) => result,
            Err(_) => Err(Error::HealthProbeTimeout {
                region: region.id.clone(),
                timeout_ms: self.config.timeout_ms,
            }),
        }
    }

    /// Probe every active region once and apply the outcomes.
    ///
    /// Probes run concurrently; each carries its own timeout so one hung
    /// region cannot stall the cycle.
    pub async fn run_cycle(&self) -> Vec<HealthEvent> {
        let _writer = self.cycle.lock().await;

        let regions: Vec<&Region> = self.registry.active_regions().collect();
        let outcomes = futures::future::join_all(regions.iter().map(|r| self.probe_region(r))).await;

        let mut events = Vec::new();
        for (region, outcome) in regions.iter().zip(outcomes) {
            if let Some(event) = self.apply(&region.id, outcome) {
                events.push(event);
            }
        }
        debug!(probe = %self.probe.kind(), regions = regions.len(), events = events.len(), "Health cycle complete");
        events
    }

    /// Apply one externally obtained probe outcome to a region's record.
    pub async fn record_probe(
        &self,
        region_id: &str,
        outcome: Result<ProbeReport>,
    ) -> Option<HealthEvent> {
        let _writer = self.cycle.lock().await;
        self.apply(region_id, outcome)
    }

    fn apply(&self, region_id: &str, outcome: Result<ProbeReport>) -> Option<HealthEvent> {
        let cell = self.records.get(region_id)?;
        let mut next = cell.load().as_ref().clone();
        next.last_check = Some(now());

        let event = match outcome {
            Ok(report) => {
                next.consecutive_successes = next.consecutive_successes.saturating_add(1);
                next.consecutive_failures = 0;
                next.last_error = None;
                next.latency = report.latency();
                if let Some(load) = report.load {
                    next.load = load.clamp(0.0, 1.0);
                }
                if next.breached && next.consecutive_successes >= self.config.success_threshold {
                    next.breached = false;
                    Some(HealthEvent::Recovered {
                        region: region_id.to_string(),
                        consecutive_successes: next.consecutive_successes,
                        at: now(),
                    })
                } else {
                    None
                }
            }
            Err(err) => {
                next.consecutive_failures = next.consecutive_failures.saturating_add(1);
                next.consecutive_successes = 0;
                debug!(region = %region_id, failures = next.consecutive_failures, error = %err, "Probe failed");
                next.last_error = Some(err.to_string());
                if !next.breached && next.consecutive_failures >= self.config.failure_threshold {
                    next.breached = true;
                    Some(HealthEvent::Breach {
                        region: region_id.to_string(),
                        consecutive_failures: next.consecutive_failures,
                        at: now(),
                    })
                } else {
                    None
                }
            }
        };
        next.healthy = next.consecutive_failures < self.config.failure_threshold;
        let last_error = next.last_error.clone();
        cell.store(Arc::new(next));

        if let Some(event) = &event {
            self.announce(event, last_error.as_deref());
        }
        event
    }

    fn announce(&self, event: &HealthEvent, last_error: Option<&str>) {
        match event {
            HealthEvent::Breach {
                region,
                consecutive_failures,
                ..
            } => {
                warn!(region = %region, failures = consecutive_failures, "Region health breach");
                self.notifier.notify(
                    Notification::new(
                        NotificationKind::HealthBreach,
                        region,
                        last_error.unwrap_or("consecutive probe failures"),
                    )
                    .with_severity(AlertSeverity::Critical)
                    .with_detail("consecutive_failures", consecutive_failures),
                );
            }
            HealthEvent::Recovered {
                region,
                consecutive_successes,
                ..
            } => {
                info!(region = %region, successes = consecutive_successes, "Region recovered");
                self.notifier.notify(
                    Notification::new(NotificationKind::HealthRecovered, region, "probes succeeding")
                        .with_detail("consecutive_successes", consecutive_successes),
                );
            }
        }
    }
}
