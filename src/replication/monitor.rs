//! Replication lag monitoring.
//!
//! Samples every configured link on its own cadence and raises an
//! edge-triggered alert when lag goes over the link's threshold. Lag never
//! influences routing.

use crate::config::{ReplicationConfig, ReplicationLinkConfig};
use crate::core::{now, Error, RegionId, Result, Timestamp};
use crate::monitoring::{AlertSeverity, Notification, NotificationKind, Notifier};
use crate::region::RegionRegistry;
use crate::replication::sampler::LagSampler;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Current state of one replication link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationLink {
    pub source: RegionId,
    pub target: RegionId,
    /// Last sampled lag (ms)
    pub lag_ms: u64,
    pub max_lag_ms: u64,
    /// An exceeded alert was raised and not cleared since
    pub exceeded: bool,
    pub last_sample: Option<Timestamp>,
    pub last_error: Option<String>,
}

impl ReplicationLink {
    fn initial(config: &ReplicationLinkConfig) -> Self {
        Self {
            source: config.source.clone(),
            target: config.target.clone(),
            lag_ms: 0,
            max_lag_ms: config.max_lag_ms,
            exceeded: false,
            last_sample: None,
            last_error: None,
        }
    }
}

/// Edge-triggered lag transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationEvent {
    LagExceeded {
        source: RegionId,
        target: RegionId,
        lag_ms: u64,
        max_lag_ms: u64,
    },
    LagCleared {
        source: RegionId,
        target: RegionId,
        lag_ms: u64,
    },
}

/// Replication monitor.
pub struct ReplicationMonitor {
    links: Vec<(ReplicationLinkConfig, ArcSwap<ReplicationLink>)>,
    sampler: Arc<dyn LagSampler>,
    config: ReplicationConfig,
    notifier: Notifier,
    cycle: tokio::sync::Mutex<()>,
}

impl ReplicationMonitor {
    /// Create a monitor for every link in the registry.
    pub fn new(
        registry: &RegionRegistry,
        sampler: Arc<dyn LagSampler>,
        config: ReplicationConfig,
        notifier: Notifier,
    ) -> Self {
        let links = registry
            .replication_links()
            .iter()
            .map(|l| (l.clone(), ArcSwap::from_pointee(ReplicationLink::initial(l))))
            .collect();
        Self {
            links,
            sampler,
            config,
            notifier,
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Current state of all links.
    pub fn links(&self) -> Vec<ReplicationLink> {
        self.links
            .iter()
            .map(|(_, state)| state.load().as_ref().clone())
            .collect()
    }

    /// Current state of one link.
    pub fn link(&self, source: &str, target: &str) -> Option<ReplicationLink> {
        self.links
            .iter()
            .find(|(c, _)| c.source == source && c.target == target)
            .map(|(_, state)| state.load().as_ref().clone())
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Sample every link once and apply the results.
    pub async fn run_cycle(&self) -> Vec<ReplicationEvent> {
        let _writer = self.cycle.lock().await;

        let samples = futures::future::join_all(
            self.links.iter().map(|(config, _)| self.sample(config)),
        )
        .await;

        let mut events = Vec::new();
        for ((config, state), sample) in self.links.iter().zip(samples) {
            if let Some(event) = self.apply(config, state, sample) {
                events.push(event);
            }
        }
        debug!(links = self.links.len(), events = events.len(), "Replication cycle complete");
        events
    }

    async fn sample(&self, link: &ReplicationLinkConfig) -> Result<u64> {
        match tokio::time::timeout(self.config.timeout(), self.sampler.sample(link)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Probe(format!(
                "lag sample {}->{} timed out after {}ms",
                link.source, link.target, self.config.timeout_ms
            ))),
        }
    }

    fn apply(
        &self,
        config: &ReplicationLinkConfig,
        state: &ArcSwap<ReplicationLink>,
        sample: Result<u64>,
    ) -> Option<ReplicationEvent> {
        let mut next = state.load().as_ref().clone();
        let lag_ms = match sample {
            Ok(lag) => lag,
            Err(e) => {
                // A failed sample keeps the last known lag and alert state.
                debug!(source = %config.source, target = %config.target, error = %e, "Lag sample failed");
                next.last_error = Some(e.to_string());
                state.store(Arc::new(next));
                return None;
            }
        };
        next.lag_ms = lag_ms;
        next.last_sample = Some(now());
        next.last_error = None;

        let over = lag_ms > config.max_lag_ms;
        let event = match (over, next.exceeded) {
            (true, false) => {
                next.exceeded = true;
                Some(ReplicationEvent::LagExceeded {
                    source: config.source.clone(),
                    target: config.target.clone(),
                    lag_ms,
                    max_lag_ms: config.max_lag_ms,
                })
            }
            (false, true) => {
                next.exceeded = false;
                Some(ReplicationEvent::LagCleared {
                    source: config.source.clone(),
                    target: config.target.clone(),
                    lag_ms,
                })
            }
            _ => None,
        };
        state.store(Arc::new(next));

        if let Some(event) = &event {
            self.announce(event);
        }
        event
    }

    fn announce(&self, event: &ReplicationEvent) {
        match event {
            ReplicationEvent::LagExceeded {
                source,
                target,
                lag_ms,
                max_lag_ms,
            } => {
                let alert = Error::ReplicationLagExceeded {
                    source_region: source.clone(),
                    target_region: target.clone(),
                    lag_ms: *lag_ms,
                    max_lag_ms: *max_lag_ms,
                };
                warn!(source = %source, target = %target, lag_ms = lag_ms, max_lag_ms = max_lag_ms, "Replication lag exceeded");
                self.notifier.notify(
                    Notification::new(NotificationKind::ReplicationLagExceeded, source, &alert.to_string())
                        .with_severity(AlertSeverity::Warning)
                        .with_detail("target", target)
                        .with_detail("lag_ms", lag_ms)
                        .with_detail("max_lag_ms", max_lag_ms),
                );
            }
            ReplicationEvent::LagCleared {
                source,
                target,
                lag_ms,
            } => {
                info!(source = %source, target = %target, lag_ms = lag_ms, "Replication lag back under threshold");
                self.notifier.notify(
                    Notification::new(
                        NotificationKind::ReplicationLagCleared,
                        source,
                        "replication lag back under threshold",
                    )
                    .with_detail("target", target)
                    .with_detail("lag_ms", lag_ms),
                );
            }
        }
    }
}
