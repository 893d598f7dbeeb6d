//! Status reporting.
//!
//! Read-only aggregation of routing counts, health, failover history and
//! replication state for external consumers.

use crate::config::StatusConfig;
use crate::core::{now, LatencyPercentiles, RegionId, Result, Timestamp};
use crate::failover::{FailoverEvent, FailoverOrchestrator, FailoverState};
use crate::health::HealthMonitor;
use crate::monitoring::{Counter, RegionCounters};
use crate::region::RegionRegistry;
use crate::replication::{ReplicationLink, ReplicationMonitor};
use crate::routing::RoutingDecision;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-region line of a snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionStatus {
    pub region_id: RegionId,
    pub active: bool,
    /// Requests routed to this region
    pub routed: u64,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub load: f64,
    pub latency: LatencyPercentiles,
    pub failover_state: FailoverState,
    /// Share of this region's traffic redirected to its secondary
    pub shifted_percent: u8,
}

/// Point-in-time status of the federation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub generated_at: Timestamp,
    pub total_routed: u64,
    /// Requests that failed with no healthy region
    pub rejected: u64,
    pub regions: Vec<RegionStatus>,
    /// Most recent failover events, oldest first
    pub failover_events: Vec<FailoverEvent>,
    pub replication_links: Vec<ReplicationLink>,
}

impl StatusSnapshot {
    /// Get one region's line.
    pub fn region(&self, region_id: &str) -> Option<&RegionStatus> {
        self.regions.iter().find(|r| r.region_id == region_id)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Status reporter.
pub struct StatusReporter {
    registry: Arc<RegionRegistry>,
    health: Arc<HealthMonitor>,
    orchestrator: Arc<FailoverOrchestrator>,
    replication: Arc<ReplicationMonitor>,
    routed: RegionCounters,
    rejected: Counter,
    config: StatusConfig,
}

impl StatusReporter {
    pub fn new(
        registry: Arc<RegionRegistry>,
        health: Arc<HealthMonitor>,
        orchestrator: Arc<FailoverOrchestrator>,
        replication: Arc<ReplicationMonitor>,
        config: StatusConfig,
    ) -> Self {
        let routed = RegionCounters::new(registry.list_regions().iter().map(|r| r.id.as_str()));
        Self {
            registry,
            health,
            orchestrator,
            replication,
            routed,
            rejected: Counter::new(),
            config,
        }
    }

    /// Count a routed request.
    pub fn record_route(&self, decision: &RoutingDecision) {
        self.routed.inc(&decision.region_id);
    }

    /// Count a request that found no region.
    pub fn record_rejection(&self) {
        self.rejected.inc();
    }

    pub fn routed(&self, region_id: &str) -> u64 {
        self.routed.get(region_id)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.get()
    }

    /// Build a snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        let view = self.orchestrator.routing_view();
        let states = self.orchestrator.states();
        let routed = self.routed.values();

        let regions = self
            .registry
            .list_regions()
            .iter()
            .map(|region| {
                let health = self.health.health(&region.id);
                RegionStatus {
                    region_id: region.id.clone(),
                    active: region.is_active(),
                    routed: routed.get(&region.id).copied().unwrap_or(0),
                    healthy: health.as_ref().map(|h| h.healthy).unwrap_or(false),
                    consecutive_failures: health
                        .as_ref()
                        .map(|h| h.consecutive_failures)
                        .unwrap_or(0),
                    load: health.as_ref().map(|h| h.load).unwrap_or(region.load),
                    latency: health.as_ref().map(|h| h.latency).unwrap_or(region.latency),
                    failover_state: states.get(&region.id).copied().unwrap_or_default(),
                    shifted_percent: view.shifted_percent(&region.id),
                }
            })
            .collect();

        StatusSnapshot {
            generated_at: now(),
            total_routed: self.routed.total(),
            rejected: self.rejected.get(),
            regions,
            failover_events: self.orchestrator.recent_events(self.config.event_history),
            replication_links: self.replication.links(),
        }
    }

    /// Export counters in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let mut output = self
            .routed
            .export_prometheus("fedroute_routed_total", "Requests routed per region");
        output.push_str("# HELP fedroute_rejected_total Requests with no healthy region\n");
        output.push_str("# TYPE fedroute_rejected_total counter\n");
        output.push_str(&format!("fedroute_rejected_total {}\n", self.rejected.get()));
        output
    }
}
