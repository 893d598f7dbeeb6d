//! Federation wiring.
//!
//! Builds every component from one validated configuration, exposes the
//! operational entry points and runs the periodic health, replication and
//! status loops until shutdown.

use crate::config::FederationConfig;
use crate::core::{Error, Result};
use crate::failover::{
    CheckpointStore, FailoverOrchestrator, FailoverState, JsonFileCheckpointStore,
    MemoryCheckpointStore,
};
use crate::health::{HealthEvent, HealthMonitor, HealthProbe};
use crate::monitoring::Notifier;
use crate::region::{RegionRegistry, RoutingViewCell};
use crate::replication::{LagSampler, ReplicationEvent, ReplicationMonitor};
use crate::routing::{RoutingDecision, RoutingEngine};
use crate::status::{StatusReporter, StatusSnapshot};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A running federation router.
pub struct Federation {
    config: FederationConfig,
    registry: Arc<RegionRegistry>,
    health: Arc<HealthMonitor>,
    engine: RoutingEngine,
    orchestrator: Arc<FailoverOrchestrator>,
    replication: Arc<ReplicationMonitor>,
    status: StatusReporter,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Federation {
    /// Validate the configuration and build every component.
    ///
    /// Configuration errors are fatal; nothing is started.
    pub fn new(
        config: FederationConfig,
        probe: Arc<dyn HealthProbe>,
        sampler: Arc<dyn LagSampler>,
        notifier: Notifier,
    ) -> Result<Arc<Self>> {
        let registry = Arc::new(RegionRegistry::from_config(&config)?);

        let checkpoints: Arc<dyn CheckpointStore> = match &config.orchestrator.checkpoint_dir {
            Some(dir) => Arc::new(JsonFileCheckpointStore::new(dir).map_err(|e| {
                Error::config(format!("checkpoint directory {}: {}", dir, e))
            })?),
            None => Arc::new(MemoryCheckpointStore::new()),
        };

        let view = Arc::new(RoutingViewCell::new());
        let health = Arc::new(HealthMonitor::new(
            registry.clone(),
            probe,
            config.health.clone(),
            notifier.clone(),
        ));
        let engine = RoutingEngine::new(
            registry.clone(),
            health.clone(),
            view.clone(),
            config.routing.clone(),
        );
        let orchestrator = Arc::new(FailoverOrchestrator::new(
            registry.clone(),
            health.clone(),
            view,
            checkpoints,
            config.orchestrator.clone(),
            notifier.clone(),
        ));
        let replication = Arc::new(ReplicationMonitor::new(
            &registry,
            sampler,
            config.replication.clone(),
            notifier,
        ));
        let status = StatusReporter::new(
            registry.clone(),
            health.clone(),
            orchestrator.clone(),
            replication.clone(),
            config.status.clone(),
        );
        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            config,
            registry,
            health,
            engine,
            orchestrator,
            replication,
            status,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RegionRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn orchestrator(&self) -> &Arc<FailoverOrchestrator> {
        &self.orchestrator
    }

    pub fn replication(&self) -> &Arc<ReplicationMonitor> {
        &self.replication
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    /// Route one request and count the outcome.
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use fedroute::config::{FederationConfig, RegionConfig};
    /// use fedroute::health::ScriptedProbe;
    /// use fedroute::monitoring::Notifier;
    /// use fedroute::replication::FixedLagSampler;
    /// use fedroute::Federation;
    /// use std::sync::Arc;
    ///
    /// let mut config = FederationConfig::default();
    /// config.regions = vec![
    ///     RegionConfig::new("eu-west").with_sovereignty("EU"),
    ///     RegionConfig::new("us-east").with_sovereignty("US"),
    /// ];
    /// let federation = Federation::new(
    ///     config,
    ///     Arc::new(ScriptedProbe::new()),
    ///     Arc::new(FixedLagSampler::new()),
    ///     Notifier::new(),
    /// )
    /// .unwrap();
    /// federation.run_health_cycle().await;
    ///
    /// let decision = federation.route(None, Some("EU")).unwrap();
    /// assert_eq!(decision.region_id, "eu-west");
    /// # });
    /// ```
    pub fn route(&self, geo: Option<&str>, sovereignty: Option<&str>) -> Result<RoutingDecision> {
        match self.engine.route(geo, sovereignty) {
            Ok(decision) => {
                self.status.record_route(&decision);
                Ok(decision)
            }
            Err(e) => {
                if matches!(e, Error::NoHealthyRegion { .. }) {
                    self.status.record_rejection();
                }
                Err(e)
            }
        }
    }

    /// Probe every region once and feed the resulting transitions to the
    /// orchestrator.
    pub async fn run_health_cycle(self: &Arc<Self>) -> Vec<HealthEvent> {
        let events = self.health.run_cycle().await;
        for event in &events {
            match event {
                HealthEvent::Breach {
                    region,
                    consecutive_failures,
                    ..
                } => {
                    let reason = format!("{} consecutive failed probes", consecutive_failures);
                    match self.orchestrator.on_health_breach(region, &reason).await {
                        Ok(state) => debug!(region = %region, state = %state, "Failover started"),
                        // Escalated inside the orchestrator.
                        Err(Error::FailoverPairMissing(_)) | Err(Error::SecondaryUnhealthy { .. }) => {}
                        Err(e) => warn!(region = %region, error = %e, "Failover not started"),
                    }
                }
                HealthEvent::Recovered { region, .. } => {
                    if let Err(e) = self.orchestrator.on_health_recovered(region).await {
                        warn!(region = %region, error = %e, "Recovery not applied");
                    }
                }
            }
        }
        self.orchestrator.reconcile_recovered().await;
        events
    }

    /// Sample every replication link once.
    pub async fn run_replication_cycle(&self) -> Vec<ReplicationEvent> {
        self.replication.run_cycle().await
    }

    /// Fail a region over on operator request.
    pub async fn trigger_manual_failover(
        self: &Arc<Self>,
        region_id: &str,
        reason: &str,
    ) -> Result<FailoverState> {
        info!(region = %region_id, reason = %reason, "Manual failover requested");
        self.orchestrator
            .trigger_manual_failover(region_id, reason)
            .await
    }

    /// Restore a recovering region's original weighting.
    pub async fn rebalance(&self, region_id: &str) -> Result<()> {
        self.orchestrator.rebalance(region_id).await
    }

    /// Read-only snapshot for reporting consumers.
    pub fn get_status_snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Restore checkpointed failovers and start the background loops.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.orchestrator.recover().await?;

        let this = Arc::clone(self);
        self.spawn_loop("health", self.config.health.interval(), move || {
            let this = this.clone();
            async move {
                this.run_health_cycle().await;
            }
        });

        if !self.registry.replication_links().is_empty() {
            let this = Arc::clone(self);
            self.spawn_loop("replication", self.config.replication.interval(), move || {
                let this = this.clone();
                async move {
                    this.run_replication_cycle().await;
                }
            });
        }

        let this = Arc::clone(self);
        self.spawn_loop(
            "status",
            Duration::from_millis(self.config.status.log_interval_ms),
            move || {
                let this = this.clone();
                async move {
                    this.log_status();
                }
            },
        );

        info!(
            regions = self.registry.region_count(),
            health_interval_ms = self.config.health.interval_ms,
            "Federation started"
        );
        Ok(())
    }

    fn spawn_loop<F, Fut>(&self, name: &'static str, period: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    _ = shutdown.changed() => break,
                }
            }
            debug!(task = name, "Loop stopped");
        });
        self.tasks.lock().push(handle);
    }

    fn log_status(&self) {
        let snapshot = self.status.snapshot();
        let unhealthy = snapshot.regions.iter().filter(|r| r.active && !r.healthy).count();
        let failed_over = snapshot
            .regions
            .iter()
            .filter(|r| r.failover_state != FailoverState::Stable)
            .count();
        info!(
            routed = snapshot.total_routed,
            rejected = snapshot.rejected,
            unhealthy = unhealthy,
            failed_over = failed_over,
            "Federation status"
        );
    }

    /// Stop the loops and any running shift, then wait for them.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.orchestrator.shutdown().await;
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task failed");
            }
        }
        info!("Federation stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FailoverPairConfig, GeoPreference, RegionConfig, ReplicationLinkConfig};
    use crate::health::ScriptedProbe;
    use crate::monitoring::{MemorySink, NotificationKind};
    use crate::replication::FixedLagSampler;

    struct Fixture {
        federation: Arc<Federation>,
        probe: Arc<ScriptedProbe>,
        sampler: Arc<FixedLagSampler>,
        sink: Arc<MemorySink>,
    }

    fn config() -> FederationConfig {
        let mut config = FederationConfig::default();
        config.regions = vec![
            RegionConfig::new("eu-west").with_sovereignty("EU").with_weight(100.0),
            RegionConfig::new("eu-central").with_sovereignty("EU"),
            RegionConfig::new("us-east").with_sovereignty("US"),
        ];
        config.failover.pairs = vec![FailoverPairConfig::new("eu-west", "eu-central")];
        config.failover.geo_preferences.insert(
            "europe".to_string(),
            GeoPreference {
                preferred: vec!["eu-west".to_string()],
                fallback: Some("eu-central".to_string()),
            },
        );
        config.failover.replication_links = vec![ReplicationLinkConfig {
            source: "eu-west".to_string(),
            target: "eu-central".to_string(),
            max_lag_ms: 1_000,
        }];
        config.health.interval_ms = 20;
        config.health.timeout_ms = 50;
        config.replication.interval_ms = 20;
        config
    }

    fn fixture(config: FederationConfig) -> Fixture {
        let probe = Arc::new(ScriptedProbe::new());
        let sampler = Arc::new(FixedLagSampler::new());
        let sink = Arc::new(MemorySink::default());
        let federation = Federation::new(
            config,
            probe.clone(),
            sampler.clone(),
            Notifier::new().with_sink(sink.clone()),
        )
        .unwrap();
        Fixture {
            federation,
            probe,
            sampler,
            sink,
        }
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let mut config = config();
        config.failover.pairs = vec![FailoverPairConfig::new("eu-west", "nowhere")];
        let result = Federation::new(
            config,
            Arc::new(ScriptedProbe::new()),
            Arc::new(FixedLagSampler::new()),
            Notifier::new(),
        );
        assert!(matches!(result, Err(ref e) if e.is_fatal()));
    }

    #[tokio::test]
    async fn test_breach_drives_failover_and_routing() {
        let f = fixture(config());
        let before = f.federation.route(Some("europe"), Some("EU")).unwrap();
        assert_eq!(before.region_id, "eu-west");

        f.probe.set_down("eu-west");
        for _ in 0..3 {
            f.federation.run_health_cycle().await;
        }

        assert_eq!(
            f.federation.orchestrator().state("eu-west"),
            Some(FailoverState::FailedOver)
        );
        let after = f.federation.route(Some("europe"), Some("EU")).unwrap();
        assert_eq!(after.region_id, "eu-central");
        assert_eq!(after.redirected_from.as_deref(), Some("eu-west"));

        f.probe.set_up("eu-west");
        for _ in 0..2 {
            f.federation.run_health_cycle().await;
        }
        assert_eq!(
            f.federation.orchestrator().state("eu-west"),
            Some(FailoverState::Recovering)
        );

        f.federation.rebalance("eu-west").await.unwrap();
        let restored = f.federation.route(Some("europe"), Some("EU")).unwrap();
        assert_eq!(restored.region_id, "eu-west");

        let snapshot = f.federation.get_status_snapshot();
        assert_eq!(snapshot.total_routed, 3);
        assert_eq!(snapshot.failover_events.len(), 4);
        assert_eq!(f.sink.count(NotificationKind::HealthBreach), 1);
    }

    #[tokio::test]
    async fn test_rejections_counted() {
        let f = fixture(config());
        let err = f.federation.route(None, Some("APAC")).unwrap_err();
        assert!(matches!(err, Error::NoHealthyRegion { .. }));
        assert_eq!(f.federation.get_status_snapshot().rejected, 1);
    }

    #[tokio::test]
    async fn test_manual_failover() {
        let f = fixture(config());
        let state = f
            .federation
            .trigger_manual_failover("eu-west", "maintenance")
            .await
            .unwrap();
        assert_eq!(state, FailoverState::FailedOver);

        let err = f
            .federation
            .trigger_manual_failover("us-east", "maintenance")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FailoverPairMissing(_)));
        assert_eq!(f.sink.count(NotificationKind::Escalation), 1);
    }

    #[tokio::test]
    async fn test_background_loops_run_until_shutdown() {
        let f = fixture(config());
        f.sampler.set("eu-west", "eu-central", 5_000);
        f.probe.set_down("us-east");
        f.federation.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::time::timeout(Duration::from_secs(5), f.federation.shutdown())
            .await
            .unwrap();

        assert!(!f.federation.health().is_healthy("us-east"));
        assert_eq!(f.sink.count(NotificationKind::ReplicationLagExceeded), 1);
        // us-east has no pair: one escalation per breach.
        assert_eq!(f.sink.count(NotificationKind::Escalation), 1);
        let link = &f.federation.get_status_snapshot().replication_links[0];
        assert!(link.exceeded);
    }

    #[tokio::test]
    async fn test_checkpoint_dir_restores_failover() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.orchestrator.checkpoint_dir = Some(dir.path().display().to_string());

        let first = fixture(config.clone());
        first
            .federation
            .trigger_manual_failover("eu-west", "drill")
            .await
            .unwrap();
        first.federation.shutdown().await;

        let second = fixture(config);
        second.federation.start().await.unwrap();
        assert_eq!(
            second.federation.orchestrator().state("eu-west"),
            Some(FailoverState::FailedOver)
        );
        assert_eq!(second.federation.orchestrator().shifted_percent("eu-west"), 100);
        second.federation.shutdown().await;
    }
}
