//! Request routing.
//!
//! Selects a target region for one request: sovereignty filter first, then
//! the geo preference list, then a weighted draw over everything eligible.
//! All reads (registry, health records, routing view) are lock-free.

use crate::config::{EndpointConfig, RoutingConfig};
use crate::core::{Error, RegionId, Result};
use crate::health::HealthMonitor;
use crate::region::{Region, RegionRegistry, RoutingView, RoutingViewCell};
use crate::routing::weighted::weighted_pick;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// How a decision was reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPath {
    /// An entry of the geo bucket's preferred list
    GeoPreferred,
    /// The geo bucket's fallback region
    GeoFallback,
    /// Weighted draw over all eligible regions
    Weighted,
}

/// Result of routing one request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Target region
    pub region_id: RegionId,
    /// Endpoint to dispatch to
    pub endpoint: Option<EndpointConfig>,
    /// Estimated latency (p50, ms)
    pub estimated_latency_ms: f64,
    /// Compliance tags of the target
    pub compliance: Vec<String>,
    /// Sovereignty tag of the target
    pub sovereignty: Option<String>,
    /// Selection step that produced the decision
    pub path: SelectionPath,
    /// Region the request was redirected away from by a failover
    pub redirected_from: Option<RegionId>,
}

/// Routing engine.
pub struct RoutingEngine {
    registry: Arc<RegionRegistry>,
    health: Arc<HealthMonitor>,
    view: Arc<RoutingViewCell>,
    config: RoutingConfig,
}

impl RoutingEngine {
    pub fn new(
        registry: Arc<RegionRegistry>,
        health: Arc<HealthMonitor>,
        view: Arc<RoutingViewCell>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            registry,
            health,
            view,
            config,
        }
    }

    /// Route a request using the thread-local RNG.
    pub fn route(&self, geo: Option<&str>, sovereignty: Option<&str>) -> Result<RoutingDecision> {
        self.route_with_rng(geo, sovereignty, &mut rand::thread_rng())
    }

    /// Route a request with a caller-supplied RNG.
    pub fn route_with_rng<R: Rng>(
        &self,
        geo: Option<&str>,
        sovereignty: Option<&str>,
        rng: &mut R,
    ) -> Result<RoutingDecision> {
        let no_region = || Error::NoHealthyRegion {
            sovereignty: sovereignty.map(str::to_string),
            geo: geo.map(str::to_string),
        };

        // Sovereignty is a hard constraint.
        let allowed: Vec<&Region> = self
            .registry
            .active_regions()
            .filter(|r| r.satisfies(sovereignty))
            .collect();
        if allowed.is_empty() {
            debug!(sovereignty = ?sovereignty, "No region satisfies sovereignty requirement");
            return Err(no_region());
        }

        let view = self.view.snapshot();

        if let Some(preference) = geo.and_then(|bucket| self.registry.geo_preference(bucket)) {
            for id in &preference.preferred {
                if let Some(decision) =
                    self.try_candidate(id, &view, sovereignty, SelectionPath::GeoPreferred, rng)
                {
                    return Ok(decision);
                }
            }
            if let Some(fallback) = &preference.fallback {
                if let Some(decision) =
                    self.try_candidate(fallback, &view, sovereignty, SelectionPath::GeoFallback, rng)
                {
                    return Ok(decision);
                }
            }
        }

        // Shifted weight moves before eligibility filtering so a failed
        // primary's share reaches its secondary.
        let mut weights: Vec<(RegionId, f64)> =
            allowed.iter().map(|r| (r.id.clone(), r.weight)).collect();
        view.redistribute(&mut weights);
        weights.retain(|(id, _)| self.admits(id));

        match weighted_pick(&weights, rng) {
            Some(id) => {
                let region = self
                    .registry
                    .get_region(id)
                    .ok_or_else(|| Error::RegionNotFound(id.to_string()))?;
                Ok(self.decision(region, SelectionPath::Weighted, None))
            }
            None => {
                debug!(sovereignty = ?sovereignty, geo = ?geo, "No healthy region under admission threshold");
                Err(no_region())
            }
        }
    }

    fn try_candidate<R: Rng>(
        &self,
        id: &str,
        view: &RoutingView,
        sovereignty: Option<&str>,
        path: SelectionPath,
        rng: &mut R,
    ) -> Option<RoutingDecision> {
        let target = view.resolve(id, rng);
        let region = self.registry.get_region(target)?;
        if !region.satisfies(sovereignty) || !self.admits(target) {
            trace!(candidate = %id, target = %target, "Candidate rejected");
            return None;
        }
        let redirected_from = (target != id).then(|| id.to_string());
        Some(self.decision(region, path, redirected_from))
    }

    /// Active, healthy, and below the admission threshold.
    fn admits(&self, id: &str) -> bool {
        let Some(region) = self.registry.get_region(id) else {
            return false;
        };
        if !region.is_active() || !self.health.is_healthy(id) {
            return false;
        }
        let load = self.health.current_load(id).unwrap_or(region.load);
        load < self.config.admission_threshold
    }

    fn decision(
        &self,
        region: &Region,
        path: SelectionPath,
        redirected_from: Option<RegionId>,
    ) -> RoutingDecision {
        let latency = self
            .health
            .current_latency(&region.id)
            .unwrap_or(region.latency);
        trace!(region = %region.id, path = ?path, redirected_from = ?redirected_from, "Routed");
        RoutingDecision {
            region_id: region.id.clone(),
            endpoint: region.primary_endpoint().cloned(),
            estimated_latency_ms: latency.p50_ms,
            compliance: region.compliance.clone(),
            sovereignty: region.sovereignty.clone(),
            path,
            redirected_from,
        }
    }
}
