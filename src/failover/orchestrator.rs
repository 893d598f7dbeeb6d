//! Failover orchestration.
//!
//! Drives each primary through `Stable -> FailingOver -> FailedOver ->
//! Recovering -> Stable`. The orchestrator is the only writer of the
//! routing view. Gradual shifts run as spawned tasks holding the region's
//! lease; shutdown stops them at the next step boundary and their
//! checkpoint is left for `recover()`.

use crate::config::{FailoverPairConfig, OrchestratorConfig, ResumePolicy, ShiftStrategy};
use crate::core::{Error, RegionId, Result};
use crate::failover::checkpoint::{CheckpointStore, ShiftCheckpoint, ShiftLease};
use crate::failover::state::{FailoverEvent, FailoverState, FailoverTrigger};
use crate::health::HealthMonitor;
use crate::monitoring::{AlertSeverity, Notification, NotificationKind, Notifier};
use crate::region::{RegionRegistry, RoutingView, RoutingViewCell};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Oldest events are dropped beyond this many.
const EVENT_LOG_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct Slot {
    state: FailoverState,
    /// Primary recovered while its shift was still running
    recovered_pending: bool,
}

/// Both leases a running shift holds: the in-process one and the one
/// shared through the checkpoint store.
struct ShiftGuard {
    _local: OwnedMutexGuard<()>,
    _store: ShiftLease,
}

/// Per-region state plus the lease held by a running shift.
struct RegionControl {
    slot: Mutex<Slot>,
    lease: Arc<tokio::sync::Mutex<()>>,
}

impl RegionControl {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            lease: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

/// Failover state machine for every region.
pub struct FailoverOrchestrator {
    registry: Arc<RegionRegistry>,
    health: Arc<HealthMonitor>,
    view: Arc<RoutingViewCell>,
    checkpoints: Arc<dyn CheckpointStore>,
    notifier: Notifier,
    config: OrchestratorConfig,
    regions: HashMap<RegionId, RegionControl>,
    events: RwLock<VecDeque<FailoverEvent>>,
    tasks: Mutex<HashMap<RegionId, JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl FailoverOrchestrator {
    /// Create an orchestrator with every region `Stable`.
    pub fn new(
        registry: Arc<RegionRegistry>,
        health: Arc<HealthMonitor>,
        view: Arc<RoutingViewCell>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: OrchestratorConfig,
        notifier: Notifier,
    ) -> Self {
        let regions = registry
            .list_regions()
            .iter()
            .map(|r| (r.id.clone(), RegionControl::new()))
            .collect();
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            health,
            view,
            checkpoints,
            notifier,
            config,
            regions,
            events: RwLock::new(VecDeque::new()),
            tasks: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Current state of a region.
    pub fn state(&self, region_id: &str) -> Option<FailoverState> {
        self.regions.get(region_id).map(|c| c.slot.lock().state)
    }

    /// State of every region.
    pub fn states(&self) -> BTreeMap<RegionId, FailoverState> {
        self.regions
            .iter()
            .map(|(id, c)| (id.clone(), c.slot.lock().state))
            .collect()
    }

    /// The full event log, oldest first.
    pub fn events(&self) -> Vec<FailoverEvent> {
        self.events.read().iter().cloned().collect()
    }

    /// The last `limit` events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<FailoverEvent> {
        let events = self.events.read();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    /// Current routing view.
    pub fn routing_view(&self) -> Arc<RoutingView> {
        self.view.snapshot()
    }

    /// Share of a primary's traffic currently on its secondary.
    pub fn shifted_percent(&self, region_id: &str) -> u8 {
        self.view.snapshot().shifted_percent(region_id)
    }

    /// Start a failover in response to a health breach.
    pub async fn on_health_breach(
        self: &Arc<Self>,
        region_id: &str,
        reason: &str,
    ) -> Result<FailoverState> {
        self.begin(region_id, reason, FailoverTrigger::HealthBreach)
            .await
    }

    /// Start a failover on operator request.
    pub async fn trigger_manual_failover(
        self: &Arc<Self>,
        region_id: &str,
        reason: &str,
    ) -> Result<FailoverState> {
        self.begin(region_id, reason, FailoverTrigger::Manual).await
    }

    async fn begin(
        self: &Arc<Self>,
        region_id: &str,
        reason: &str,
        trigger: FailoverTrigger,
    ) -> Result<FailoverState> {
        let control = self.control(region_id)?;
        let Some(pair) = self.registry.get_failover_pair(region_id).cloned() else {
            warn!(region = %region_id, reason = %reason, "No failover pair configured, region stays degraded");
            self.escalate(
                region_id,
                &format!("no failover pair configured ({})", reason),
                None,
            );
            return Err(Error::FailoverPairMissing(region_id.to_string()));
        };

        let local = {
            let mut slot = control.slot.lock();
            if slot.state == FailoverState::Recovering {
                // Flapping primary: traffic never left the secondary.
                self.transition(
                    &mut slot,
                    &pair,
                    FailoverState::FailedOver,
                    trigger,
                    reason,
                    self.shifted_percent(region_id),
                );
                return Ok(FailoverState::FailedOver);
            }
            if !slot.state.accepts_failover() {
                if slot.state == FailoverState::FailingOver
                    && trigger == FailoverTrigger::HealthBreach
                    && std::mem::take(&mut slot.recovered_pending)
                {
                    info!(region = %region_id, "Primary failed again mid-shift, recovery dropped");
                }
                return Err(Error::FailoverInProgress {
                    region: region_id.to_string(),
                    state: slot.state.to_string(),
                });
            }
            if !self.health.is_healthy(&pair.secondary) {
                drop(slot);
                warn!(region = %region_id, secondary = %pair.secondary, "Secondary unhealthy, failover aborted");
                self.escalate(
                    region_id,
                    &format!("secondary {} unhealthy ({})", pair.secondary, reason),
                    Some(pair.secondary.as_str()),
                );
                return Err(Error::SecondaryUnhealthy {
                    primary: region_id.to_string(),
                    secondary: pair.secondary.clone(),
                });
            }
            control.lease.clone().try_lock_owned().map_err(|_| {
                Error::FailoverInProgress {
                    region: region_id.to_string(),
                    state: "leased".to_string(),
                }
            })?
        };

        let lease = self.store_lease(region_id, local).await?;
        {
            let mut slot = control.slot.lock();
            if !slot.state.accepts_failover() {
                return Err(Error::FailoverInProgress {
                    region: region_id.to_string(),
                    state: slot.state.to_string(),
                });
            }
            slot.recovered_pending = false;
            self.transition(
                &mut slot,
                &pair,
                FailoverState::FailingOver,
                trigger,
                reason,
                self.shifted_percent(region_id),
            );
        }

        match pair.strategy {
            ShiftStrategy::Immediate => {
                self.apply_step(&pair, &[100], 100).await;
                let state = self.complete(&pair).await;
                drop(lease);
                Ok(state)
            }
            ShiftStrategy::Gradual => {
                let steps = pair.steps.clone();
                self.spawn_shift(pair, steps, None, lease);
                Ok(FailoverState::FailingOver)
            }
        }
    }

    /// Take the checkpoint store's lease on top of the in-process one.
    async fn store_lease(&self, region_id: &str, local: OwnedMutexGuard<()>) -> Result<ShiftGuard> {
        match self.checkpoints.try_lease(region_id).await? {
            Some(store) => Ok(ShiftGuard {
                _local: local,
                _store: store,
            }),
            None => {
                warn!(region = %region_id, store = self.checkpoints.name(), "Shift owned by another orchestrator");
                Err(Error::FailoverInProgress {
                    region: region_id.to_string(),
                    state: "leased by another orchestrator".to_string(),
                })
            }
        }
    }

    fn spawn_shift(
        self: &Arc<Self>,
        pair: FailoverPairConfig,
        steps: Vec<u8>,
        resume_after: Option<u8>,
        lease: ShiftGuard,
    ) {
        let this = Arc::clone(self);
        let primary = pair.primary.clone();
        let handle = tokio::spawn(async move {
            this.run_shift(pair, steps, resume_after, lease).await;
        });
        self.tasks.lock().insert(primary, handle);
    }

    /// Apply the steps above `resume_after`, sleeping `step_duration`
    /// between applications.
    async fn run_shift(
        &self,
        pair: FailoverPairConfig,
        steps: Vec<u8>,
        resume_after: Option<u8>,
        _lease: ShiftGuard,
    ) {
        let mut shutdown = self.shutdown.subscribe();
        let floor = resume_after.unwrap_or(0);
        let pending: Vec<u8> = steps.iter().copied().filter(|p| *p > floor).collect();

        for (i, percent) in pending.into_iter().enumerate() {
            if i > 0 || resume_after.is_some() {
                if *shutdown.borrow() {
                    info!(region = %pair.primary, next = percent, "Shift cancelled at step boundary");
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(pair.step_duration()) => {}
                    _ = shutdown.changed() => {
                        info!(region = %pair.primary, next = percent, "Shift cancelled at step boundary");
                        return;
                    }
                }
            }
            self.apply_step(&pair, &steps, percent).await;
        }
        self.complete(&pair).await;
    }

    async fn apply_step(&self, pair: &FailoverPairConfig, steps: &[u8], percent: u8) {
        self.view
            .apply_shift(&pair.primary, &pair.secondary, percent);
        info!(region = %pair.primary, secondary = %pair.secondary, percent = percent, "Traffic shifted");
        self.notifier.notify(
            Notification::new(
                NotificationKind::TrafficShift,
                &pair.primary,
                &format!("{}% of traffic moved to {}", percent, pair.secondary),
            )
            .with_failover(pair.strategy, pair.rto_secs, pair.rpo_secs)
            .with_detail("secondary", &pair.secondary)
            .with_detail("percent", percent),
        );
        if let Err(e) = self
            .checkpoints
            .save(&ShiftCheckpoint::new(pair, steps, percent))
            .await
        {
            warn!(region = %pair.primary, store = self.checkpoints.name(), error = %e, "Checkpoint save failed");
            self.escalate(
                &pair.primary,
                &format!("checkpoint at {}% not saved: {}", percent, e),
                Some(pair.secondary.as_str()),
            );
        }
    }

    /// `FailingOver -> FailedOver`, then straight on to `Recovering` when
    /// the primary recovered mid-shift and is still healthy.
    async fn complete(&self, pair: &FailoverPairConfig) -> FailoverState {
        let Some(control) = self.regions.get(&pair.primary) else {
            return FailoverState::FailedOver;
        };
        let recovering = {
            let mut slot = control.slot.lock();
            self.transition(
                &mut slot,
                pair,
                FailoverState::FailedOver,
                FailoverTrigger::ShiftCompleted,
                "traffic shift complete",
                100,
            );
            let pending = std::mem::take(&mut slot.recovered_pending);
            if pending && self.health.is_healthy(&pair.primary) {
                self.transition(
                    &mut slot,
                    pair,
                    FailoverState::Recovering,
                    FailoverTrigger::HealthRecovered,
                    "primary recovered during shift",
                    100,
                );
                true
            } else {
                false
            }
        };
        if recovering {
            self.auto_rebalance(&pair.primary).await;
        }
        self.state(&pair.primary).unwrap_or(FailoverState::FailedOver)
    }

    /// React to a primary becoming healthy again.
    ///
    /// `FailedOver` moves to `Recovering`; during `FailingOver` the shift
    /// keeps running and the recovery is applied once it completes.
    pub async fn on_health_recovered(&self, region_id: &str) -> Result<FailoverState> {
        let control = self.control(region_id)?;
        let Some(pair) = self.registry.get_failover_pair(region_id) else {
            return Ok(FailoverState::Stable);
        };

        let entered = {
            let mut slot = control.slot.lock();
            match slot.state {
                FailoverState::FailingOver => {
                    slot.recovered_pending = true;
                    info!(region = %region_id, "Primary recovered mid-shift, shift continues");
                    false
                }
                FailoverState::FailedOver => {
                    self.transition(
                        &mut slot,
                        pair,
                        FailoverState::Recovering,
                        FailoverTrigger::HealthRecovered,
                        "primary healthy again",
                        self.shifted_percent(region_id),
                    );
                    true
                }
                FailoverState::Stable | FailoverState::Recovering => false,
            }
        };
        if entered {
            self.auto_rebalance(region_id).await;
        }
        self.state(region_id)
            .ok_or_else(|| Error::RegionNotFound(region_id.to_string()))
    }

    /// Move every `FailedOver` region whose primary is healthy again into
    /// `Recovering`. Covers regions restored from checkpoints, whose
    /// health never breached in this process.
    pub async fn reconcile_recovered(&self) -> usize {
        let threshold = self.health.config().success_threshold;
        let candidates: Vec<RegionId> = self
            .regions
            .iter()
            .filter(|(_, c)| c.slot.lock().state == FailoverState::FailedOver)
            .filter(|(id, _)| {
                self.health
                    .health(id)
                    .map(|h| h.healthy && !h.breached && h.consecutive_successes >= threshold)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut moved = 0;
        for id in candidates {
            if let Ok(FailoverState::Recovering | FailoverState::Stable) =
                self.on_health_recovered(&id).await
            {
                moved += 1;
            }
        }
        moved
    }

    async fn auto_rebalance(&self, region_id: &str) {
        if !self.config.auto_rebalance {
            return;
        }
        if let Err(e) = self.rebalance(region_id).await {
            warn!(region = %region_id, error = %e, "Automatic rebalance failed");
        }
    }

    /// Restore the original weighting of a `Recovering` region.
    pub async fn rebalance(&self, region_id: &str) -> Result<()> {
        let control = self.control(region_id)?;
        let pair = self
            .registry
            .get_failover_pair(region_id)
            .ok_or_else(|| Error::FailoverPairMissing(region_id.to_string()))?;

        let current = control.slot.lock().state;
        if current != FailoverState::Recovering {
            return Err(Error::InvalidTransition {
                region: region_id.to_string(),
                from: current.to_string(),
                op: "rebalance".to_string(),
            });
        }
        // Recovering blocks new failovers, so the checkpoint cannot be
        // replaced while it is removed.
        if let Err(e) = self.checkpoints.remove(region_id).await {
            warn!(region = %region_id, error = %e, "Checkpoint removal failed");
        }

        let mut slot = control.slot.lock();
        if slot.state != FailoverState::Recovering {
            return Err(Error::InvalidTransition {
                region: region_id.to_string(),
                from: slot.state.to_string(),
                op: "rebalance".to_string(),
            });
        }
        self.view.clear_shift(region_id);
        self.transition(
            &mut slot,
            pair,
            FailoverState::Stable,
            FailoverTrigger::Rebalance,
            "original weighting restored",
            0,
        );
        Ok(())
    }

    /// Restore shifts recorded before a restart.
    ///
    /// Completed shifts come back as `FailedOver`. Interrupted ones are
    /// declared `FailedOver` at 100% or resumed, per `resume_policy`.
    /// Returns the number of regions restored.
    pub async fn recover(self: &Arc<Self>) -> Result<usize> {
        let checkpoints = self.checkpoints.load_all().await?;
        let mut restored = 0;

        for checkpoint in checkpoints {
            let pair = self
                .registry
                .get_failover_pair(&checkpoint.primary)
                .filter(|p| p.secondary == checkpoint.secondary)
                .cloned();
            let Some(pair) = pair else {
                warn!(region = %checkpoint.primary, secondary = %checkpoint.secondary, "Discarding checkpoint for unknown failover pair");
                self.checkpoints.remove(&checkpoint.primary).await?;
                continue;
            };
            let control = self.control(&pair.primary)?;

            if !checkpoint.is_complete() && self.config.resume_policy == ResumePolicy::Resume {
                let Ok(local) = control.lease.clone().try_lock_owned() else {
                    continue;
                };
                let lease = match self.store_lease(&pair.primary, local).await {
                    Ok(lease) => lease,
                    Err(Error::FailoverInProgress { .. }) => continue,
                    Err(e) => return Err(e),
                };
                {
                    let mut slot = control.slot.lock();
                    if !slot.state.accepts_failover() {
                        continue;
                    }
                    if checkpoint.last_applied_percent > 0 {
                        self.view.apply_shift(
                            &pair.primary,
                            &pair.secondary,
                            checkpoint.last_applied_percent,
                        );
                    }
                    self.transition(
                        &mut slot,
                        &pair,
                        FailoverState::FailingOver,
                        FailoverTrigger::Resume,
                        "resuming interrupted shift",
                        checkpoint.last_applied_percent,
                    );
                }
                self.spawn_shift(
                    pair,
                    checkpoint.steps.clone(),
                    Some(checkpoint.last_applied_percent),
                    lease,
                );
            } else {
                {
                    let mut slot = control.slot.lock();
                    if !slot.state.accepts_failover() {
                        continue;
                    }
                    self.view.apply_shift(&pair.primary, &pair.secondary, 100);
                    let reason = if checkpoint.is_complete() {
                        "restored completed failover"
                    } else {
                        "interrupted shift declared failed over"
                    };
                    self.transition(
                        &mut slot,
                        &pair,
                        FailoverState::FailedOver,
                        FailoverTrigger::Resume,
                        reason,
                        100,
                    );
                }
                if !checkpoint.is_complete() {
                    // A shift still leased elsewhere keeps its own checkpoint.
                    if let Some(_lease) = self.checkpoints.try_lease(&pair.primary).await? {
                        self.checkpoints
                            .save(&ShiftCheckpoint::new(&pair, &checkpoint.steps, 100))
                            .await?;
                    }
                }
            }
            restored += 1;
        }

        if restored > 0 {
            info!(restored = restored, store = self.checkpoints.name(), "Restored failover state");
        }
        Ok(restored)
    }

    /// Wait for a region's running shift task, if any, to finish.
    pub async fn wait_for_shift(&self, region_id: &str) {
        let handle = self.tasks.lock().remove(region_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(region = %region_id, error = %e, "Shift task failed");
            }
        }
    }

    /// Stop running shifts at their next step boundary and wait for them.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handles: Vec<(RegionId, JoinHandle<()>)> = self.tasks.lock().drain().collect();
        debug!(tasks = handles.len(), "Stopping shift tasks");
        for (region, handle) in handles {
            if let Err(e) = handle.await {
                warn!(region = %region, error = %e, "Shift task failed");
            }
        }
    }

    fn control(&self, region_id: &str) -> Result<&RegionControl> {
        self.regions
            .get(region_id)
            .ok_or_else(|| Error::RegionNotFound(region_id.to_string()))
    }

    /// Set the state, append the event and notify, under the slot lock so
    /// the log order matches the transition order.
    fn transition(
        &self,
        slot: &mut Slot,
        pair: &FailoverPairConfig,
        to: FailoverState,
        trigger: FailoverTrigger,
        reason: &str,
        shift_percent: u8,
    ) {
        let from = slot.state;
        slot.state = to;
        let event = FailoverEvent::new(pair, from, to, trigger, reason, shift_percent);
        info!(
            region = %pair.primary,
            secondary = %pair.secondary,
            from = %from,
            to = %to,
            trigger = ?trigger,
            percent = shift_percent,
            "Failover transition"
        );

        let severity = match to {
            FailoverState::FailingOver | FailoverState::FailedOver => AlertSeverity::Warning,
            FailoverState::Recovering | FailoverState::Stable => AlertSeverity::Info,
        };
        self.notifier.notify(
            Notification::new(NotificationKind::FailoverTransition, &pair.primary, reason)
                .with_severity(severity)
                .with_failover(pair.strategy, pair.rto_secs, pair.rpo_secs)
                .with_detail("event_id", &event.id)
                .with_detail("from", from)
                .with_detail("to", to)
                .with_detail("target", &pair.secondary)
                .with_detail("percent", shift_percent),
        );

        let mut events = self.events.write();
        events.push_back(event);
        if events.len() > EVENT_LOG_CAPACITY {
            events.pop_front();
        }
    }

    fn escalate(&self, region_id: &str, reason: &str, secondary: Option<&str>) {
        let mut notification = Notification::new(NotificationKind::Escalation, region_id, reason)
            .with_severity(AlertSeverity::Critical);
        if let Some(secondary) = secondary {
            notification = notification.with_detail("secondary", secondary);
        }
        self.notifier.notify(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FederationConfig, HealthConfig, RegionConfig};
    use crate::failover::checkpoint::MemoryCheckpointStore;
    use crate::health::ScriptedProbe;
    use crate::monitoring::{MemorySink, NotificationSink};
    use std::time::{Duration, Instant};

    /// Records the percent and arrival time of every traffic shift.
    #[derive(Default)]
    struct ShiftRecorder {
        shifts: Mutex<Vec<(u8, Instant)>>,
    }

    impl ShiftRecorder {
        fn percents(&self) -> Vec<u8> {
            self.shifts.lock().iter().map(|(p, _)| *p).collect()
        }
    }

    impl NotificationSink for ShiftRecorder {
        fn notify(&self, n: &Notification) {
            if n.kind != NotificationKind::TrafficShift {
                return;
            }
            if let Some(p) = n.details.get("percent").and_then(|v| v.as_u64()) {
                self.shifts.lock().push((p as u8, Instant::now()));
            }
        }
    }

    struct Fixture {
        orchestrator: Arc<FailoverOrchestrator>,
        health: Arc<HealthMonitor>,
        view: Arc<RoutingViewCell>,
        store: Arc<MemoryCheckpointStore>,
        sink: Arc<MemorySink>,
        recorder: Arc<ShiftRecorder>,
    }

    fn step(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    fn federation_config(step_ms: u64) -> FederationConfig {
        let mut config = FederationConfig::default();
        config.regions = vec![
            RegionConfig::new("eu-west"),
            RegionConfig::new("eu-central"),
            RegionConfig::new("us-east"),
            RegionConfig::new("us-west"),
            RegionConfig::new("lonely"),
        ];
        config.failover.pairs = vec![
            FailoverPairConfig::new("eu-west", "eu-central"),
            FailoverPairConfig::new("us-east", "us-west").gradual(vec![10, 50, 100], step(step_ms)),
        ];
        config
    }

    fn fixture_with(
        config: &FederationConfig,
        orchestrator_config: OrchestratorConfig,
        store: Arc<MemoryCheckpointStore>,
    ) -> Fixture {
        let registry = Arc::new(RegionRegistry::from_config(config).unwrap());
        let sink = Arc::new(MemorySink::default());
        let recorder = Arc::new(ShiftRecorder::default());
        let notifier = Notifier::new()
            .with_sink(sink.clone())
            .with_sink(recorder.clone());
        let health = Arc::new(HealthMonitor::new(
            registry.clone(),
            Arc::new(ScriptedProbe::new()),
            HealthConfig {
                failure_threshold: 1,
                success_threshold: 1,
                ..HealthConfig::default()
            },
            notifier.clone(),
        ));
        let view = Arc::new(RoutingViewCell::new());
        let orchestrator = Arc::new(FailoverOrchestrator::new(
            registry,
            health.clone(),
            view.clone(),
            store.clone(),
            orchestrator_config,
            notifier,
        ));
        Fixture {
            orchestrator,
            health,
            view,
            store,
            sink,
            recorder,
        }
    }

    fn fixture(step_ms: u64) -> Fixture {
        fixture_with(
            &federation_config(step_ms),
            OrchestratorConfig::default(),
            Arc::new(MemoryCheckpointStore::new()),
        )
    }

    fn transitions(orchestrator: &FailoverOrchestrator) -> Vec<(FailoverState, FailoverState)> {
        orchestrator
            .events()
            .iter()
            .map(|e| (e.from, e.to))
            .collect()
    }

    #[tokio::test]
    async fn test_immediate_failover() {
        let f = fixture(10);
        let state = f
            .orchestrator
            .on_health_breach("eu-west", "3 failed probes")
            .await
            .unwrap();

        assert_eq!(state, FailoverState::FailedOver);
        assert_eq!(f.orchestrator.shifted_percent("eu-west"), 100);
        assert_eq!(
            transitions(&f.orchestrator),
            vec![
                (FailoverState::Stable, FailoverState::FailingOver),
                (FailoverState::FailingOver, FailoverState::FailedOver),
            ]
        );
        let events = f.orchestrator.events();
        assert_eq!(events[0].trigger, FailoverTrigger::HealthBreach);
        assert_eq!(events[0].reason, "3 failed probes");
        assert_eq!(events[1].rto_secs, 300);
        assert_eq!(f.sink.count(NotificationKind::FailoverTransition), 2);
        assert_eq!(f.recorder.percents(), vec![100]);
    }

    #[tokio::test]
    async fn test_missing_pair_leaves_view_unchanged() {
        let f = fixture(10);
        let err = f
            .orchestrator
            .trigger_manual_failover("lonely", "operator")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::FailoverPairMissing(ref r) if r == "lonely"));
        assert!(f.view.snapshot().is_identity());
        assert_eq!(f.orchestrator.state("lonely"), Some(FailoverState::Stable));
        assert_eq!(f.sink.count(NotificationKind::Escalation), 1);
        assert!(f.orchestrator.events().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_region() {
        let f = fixture(10);
        let err = f
            .orchestrator
            .trigger_manual_failover("mars", "operator")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RegionNotFound(_)));
    }

    #[tokio::test]
    async fn test_unhealthy_secondary_aborts() {
        let f = fixture(10);
        f.health
            .record_probe("eu-central", Err(Error::Probe("refused".to_string())))
            .await;

        let err = f
            .orchestrator
            .on_health_breach("eu-west", "breach")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SecondaryUnhealthy { .. }));
        assert_eq!(f.orchestrator.state("eu-west"), Some(FailoverState::Stable));
        assert!(f.view.snapshot().is_identity());
        assert_eq!(f.sink.count(NotificationKind::Escalation), 1);
        assert!(f.orchestrator.events().is_empty());
    }

    #[tokio::test]
    async fn test_reentry_is_refused() {
        let f = fixture(10);
        f.orchestrator
            .trigger_manual_failover("eu-west", "drill")
            .await
            .unwrap();

        let err = f
            .orchestrator
            .trigger_manual_failover("eu-west", "again")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FailoverInProgress { .. }));
        assert_eq!(f.orchestrator.events().len(), 2);
    }

    #[tokio::test]
    async fn test_gradual_steps_are_spaced() {
        let f = fixture(40);
        let state = f
            .orchestrator
            .on_health_breach("us-east", "breach")
            .await
            .unwrap();
        assert_eq!(state, FailoverState::FailingOver);

        let err = f
            .orchestrator
            .trigger_manual_failover("us-east", "again")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FailoverInProgress { .. }));

        f.orchestrator.wait_for_shift("us-east").await;

        let shifts = f.recorder.shifts.lock().clone();
        assert_eq!(
            shifts.iter().map(|(p, _)| *p).collect::<Vec<_>>(),
            vec![10, 50, 100]
        );
        for pair in shifts.windows(2) {
            assert!(pair[1].1.duration_since(pair[0].1) >= step(40));
        }
        assert_eq!(f.orchestrator.shifted_percent("us-east"), 100);
        assert_eq!(
            f.orchestrator.state("us-east"),
            Some(FailoverState::FailedOver)
        );
        let checkpoints = f.store.load_all().await.unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert!(checkpoints[0].is_complete());
    }

    #[tokio::test]
    async fn test_full_cycle_one_event_per_transition() {
        let f = fixture(10);
        f.orchestrator
            .trigger_manual_failover("eu-west", "drill")
            .await
            .unwrap();

        let state = f.orchestrator.on_health_recovered("eu-west").await.unwrap();
        assert_eq!(state, FailoverState::Recovering);
        // Fail-back is manual by default.
        assert_eq!(f.orchestrator.shifted_percent("eu-west"), 100);

        f.orchestrator.rebalance("eu-west").await.unwrap();
        assert_eq!(f.orchestrator.state("eu-west"), Some(FailoverState::Stable));
        assert!(f.view.snapshot().is_identity());
        assert!(f.store.load_all().await.unwrap().is_empty());

        assert_eq!(
            transitions(&f.orchestrator),
            vec![
                (FailoverState::Stable, FailoverState::FailingOver),
                (FailoverState::FailingOver, FailoverState::FailedOver),
                (FailoverState::FailedOver, FailoverState::Recovering),
                (FailoverState::Recovering, FailoverState::Stable),
            ]
        );
        assert_eq!(f.sink.count(NotificationKind::FailoverTransition), 4);
    }

    #[tokio::test]
    async fn test_breach_while_recovering_returns_to_failed_over() {
        let f = fixture(10);
        f.orchestrator
            .trigger_manual_failover("eu-west", "drill")
            .await
            .unwrap();
        f.orchestrator.on_health_recovered("eu-west").await.unwrap();

        let state = f
            .orchestrator
            .on_health_breach("eu-west", "flapping")
            .await
            .unwrap();
        assert_eq!(state, FailoverState::FailedOver);
        assert_eq!(f.orchestrator.shifted_percent("eu-west"), 100);
        assert_eq!(f.recorder.percents(), vec![100]);
        let last = f.orchestrator.recent_events(1).remove(0);
        assert_eq!((last.from, last.to), (FailoverState::Recovering, FailoverState::FailedOver));
    }

    #[tokio::test]
    async fn test_rebalance_requires_recovering() {
        let f = fixture(10);
        let err = f.orchestrator.rebalance("eu-west").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        f.orchestrator
            .trigger_manual_failover("eu-west", "drill")
            .await
            .unwrap();
        let err = f.orchestrator.rebalance("eu-west").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { ref from, .. } if from == "failed_over"));
    }

    #[tokio::test]
    async fn test_recovery_mid_shift_is_not_rolled_back() {
        let f = fixture(30);
        f.orchestrator
            .on_health_breach("us-east", "breach")
            .await
            .unwrap();

        let state = f.orchestrator.on_health_recovered("us-east").await.unwrap();
        assert_eq!(state, FailoverState::FailingOver);

        f.orchestrator.wait_for_shift("us-east").await;
        assert_eq!(f.recorder.percents(), vec![10, 50, 100]);
        assert_eq!(f.orchestrator.shifted_percent("us-east"), 100);
        assert_eq!(
            f.orchestrator.state("us-east"),
            Some(FailoverState::Recovering)
        );
    }

    fn probe_failed() -> Result<crate::health::ProbeReport> {
        Err(Error::Probe("refused".to_string()))
    }

    fn probe_ok() -> Result<crate::health::ProbeReport> {
        Ok(crate::health::ProbeReport::with_latency(5.0))
    }

    #[tokio::test]
    async fn test_breach_after_mid_shift_recovery_stays_failed_over() {
        let f = fixture_with(
            &federation_config(20),
            OrchestratorConfig {
                auto_rebalance: true,
                ..OrchestratorConfig::default()
            },
            Arc::new(MemoryCheckpointStore::new()),
        );
        f.health.record_probe("us-east", probe_failed()).await;
        f.orchestrator
            .on_health_breach("us-east", "breach")
            .await
            .unwrap();

        f.health.record_probe("us-east", probe_ok()).await;
        let state = f.orchestrator.on_health_recovered("us-east").await.unwrap();
        assert_eq!(state, FailoverState::FailingOver);

        f.health.record_probe("us-east", probe_failed()).await;
        let err = f
            .orchestrator
            .on_health_breach("us-east", "breach again")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FailoverInProgress { .. }));

        f.orchestrator.wait_for_shift("us-east").await;
        assert!(!f.health.is_healthy("us-east"));
        assert_eq!(
            f.orchestrator.state("us-east"),
            Some(FailoverState::FailedOver)
        );
        assert_eq!(f.orchestrator.shifted_percent("us-east"), 100);
        assert!(!f.store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unhealthy_primary_at_shift_end_stays_failed_over() {
        let f = fixture_with(
            &federation_config(20),
            OrchestratorConfig {
                auto_rebalance: true,
                ..OrchestratorConfig::default()
            },
            Arc::new(MemoryCheckpointStore::new()),
        );
        f.orchestrator
            .on_health_breach("us-east", "breach")
            .await
            .unwrap();
        f.orchestrator.on_health_recovered("us-east").await.unwrap();

        // Health drops again without a second breach reaching the orchestrator.
        f.health.record_probe("us-east", probe_failed()).await;

        f.orchestrator.wait_for_shift("us-east").await;
        assert_eq!(
            f.orchestrator.state("us-east"),
            Some(FailoverState::FailedOver)
        );
        assert_eq!(f.orchestrator.shifted_percent("us-east"), 100);
    }

    #[tokio::test]
    async fn test_auto_rebalance() {
        let f = fixture_with(
            &federation_config(10),
            OrchestratorConfig {
                auto_rebalance: true,
                ..OrchestratorConfig::default()
            },
            Arc::new(MemoryCheckpointStore::new()),
        );
        f.orchestrator
            .trigger_manual_failover("eu-west", "drill")
            .await
            .unwrap();

        let state = f.orchestrator.on_health_recovered("eu-west").await.unwrap();
        assert_eq!(state, FailoverState::Stable);
        assert!(f.view.snapshot().is_identity());
        assert_eq!(f.orchestrator.events().len(), 4);
    }

    #[tokio::test]
    async fn test_shutdown_then_declare_failed_over() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let config = federation_config(60_000);
        let first = fixture_with(&config, OrchestratorConfig::default(), store.clone());
        first
            .orchestrator
            .on_health_breach("us-east", "breach")
            .await
            .unwrap();

        tokio::time::timeout(step(5_000), first.orchestrator.shutdown())
            .await
            .unwrap();
        assert_eq!(first.recorder.percents(), vec![10]);
        assert_eq!(store.load_all().await.unwrap()[0].last_applied_percent, 10);

        let second = fixture_with(&config, OrchestratorConfig::default(), store.clone());
        assert_eq!(second.orchestrator.recover().await.unwrap(), 1);
        assert_eq!(
            second.orchestrator.state("us-east"),
            Some(FailoverState::FailedOver)
        );
        assert_eq!(second.orchestrator.shifted_percent("us-east"), 100);
        assert!(store.load_all().await.unwrap()[0].is_complete());
        assert_eq!(
            second.orchestrator.events()[0].trigger,
            FailoverTrigger::Resume
        );
    }

    #[tokio::test]
    async fn test_resume_interrupted_shift() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let config = federation_config(20);
        let pair = config.failover.pairs[1].clone();
        store
            .save(&ShiftCheckpoint::new(&pair, &pair.steps, 10))
            .await
            .unwrap();

        let f = fixture_with(
            &config,
            OrchestratorConfig {
                resume_policy: ResumePolicy::Resume,
                ..OrchestratorConfig::default()
            },
            store,
        );
        f.orchestrator.recover().await.unwrap();
        assert_eq!(
            f.orchestrator.state("us-east"),
            Some(FailoverState::FailingOver)
        );
        assert_eq!(f.orchestrator.shifted_percent("us-east"), 10);

        f.orchestrator.wait_for_shift("us-east").await;
        assert_eq!(f.recorder.percents(), vec![50, 100]);
        assert_eq!(
            f.orchestrator.state("us-east"),
            Some(FailoverState::FailedOver)
        );
    }

    #[tokio::test]
    async fn test_recover_discards_stale_checkpoint() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let stale = FailoverPairConfig::new("lonely", "eu-west");
        store
            .save(&ShiftCheckpoint::new(&stale, &[100], 100))
            .await
            .unwrap();

        let f = fixture_with(&federation_config(10), OrchestratorConfig::default(), store);
        assert_eq!(f.orchestrator.recover().await.unwrap(), 0);
        assert!(f.store.load_all().await.unwrap().is_empty());
        assert!(f.view.snapshot().is_identity());
    }

    #[tokio::test]
    async fn test_reconcile_restored_region() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let pair = FailoverPairConfig::new("eu-west", "eu-central");
        store
            .save(&ShiftCheckpoint::new(&pair, &[100], 100))
            .await
            .unwrap();
        let f = fixture_with(&federation_config(10), OrchestratorConfig::default(), store);
        f.orchestrator.recover().await.unwrap();

        // No successful probe yet.
        assert_eq!(f.orchestrator.reconcile_recovered().await, 0);

        let report = crate::health::ProbeReport::with_latency(5.0);
        f.health.record_probe("eu-west", Ok(report)).await;

        assert_eq!(f.orchestrator.reconcile_recovered().await, 1);
        assert_eq!(
            f.orchestrator.state("eu-west"),
            Some(FailoverState::Recovering)
        );
        assert_eq!(f.orchestrator.reconcile_recovered().await, 0);
    }

    struct UnwritableStore;

    #[async_trait::async_trait]
    impl CheckpointStore for UnwritableStore {
        async fn save(&self, _checkpoint: &ShiftCheckpoint) -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only filesystem").into())
        }

        async fn remove(&self, _primary: &str) -> Result<()> {
            Ok(())
        }

        async fn load_all(&self) -> Result<Vec<ShiftCheckpoint>> {
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "unwritable"
        }
    }

    fn orchestrator_with_store(
        config: &FederationConfig,
        store: Arc<dyn CheckpointStore>,
        orchestrator_config: OrchestratorConfig,
    ) -> (Arc<FailoverOrchestrator>, Arc<MemorySink>) {
        let registry = Arc::new(RegionRegistry::from_config(config).unwrap());
        let sink = Arc::new(MemorySink::default());
        let notifier = Notifier::new().with_sink(sink.clone());
        let health = Arc::new(HealthMonitor::new(
            registry.clone(),
            Arc::new(ScriptedProbe::new()),
            HealthConfig::default(),
            notifier.clone(),
        ));
        let orchestrator = Arc::new(FailoverOrchestrator::new(
            registry,
            health,
            Arc::new(RoutingViewCell::new()),
            store,
            orchestrator_config,
            notifier,
        ));
        (orchestrator, sink)
    }

    #[tokio::test]
    async fn test_shared_checkpoint_dir_allows_one_shift() {
        use crate::failover::checkpoint::JsonFileCheckpointStore;

        let dir = tempfile::tempdir().unwrap();
        let config = federation_config(60_000);
        let store = || Arc::new(JsonFileCheckpointStore::new(dir.path()).unwrap());
        let (first, _) = orchestrator_with_store(&config, store(), OrchestratorConfig::default());
        let (second, _) = orchestrator_with_store(&config, store(), OrchestratorConfig::default());

        let state = first.on_health_breach("us-east", "breach").await.unwrap();
        assert_eq!(state, FailoverState::FailingOver);

        let err = second
            .on_health_breach("us-east", "breach")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FailoverInProgress { .. }));
        assert_eq!(second.state("us-east"), Some(FailoverState::Stable));
        assert!(second.events().is_empty());

        // Resuming from the shared checkpoint is refused while it runs.
        let (resumer, _) = orchestrator_with_store(
            &config,
            store(),
            OrchestratorConfig {
                resume_policy: ResumePolicy::Resume,
                ..OrchestratorConfig::default()
            },
        );
        assert_eq!(resumer.recover().await.unwrap(), 0);
        assert_eq!(resumer.state("us-east"), Some(FailoverState::Stable));

        tokio::time::timeout(step(5_000), first.shutdown())
            .await
            .unwrap();
        let state = second
            .trigger_manual_failover("us-east", "takeover")
            .await
            .unwrap();
        assert_eq!(state, FailoverState::FailingOver);
        tokio::time::timeout(step(5_000), second.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_checkpoint_failure_escalates() {
        let (orchestrator, sink) = orchestrator_with_store(
            &federation_config(10),
            Arc::new(UnwritableStore),
            OrchestratorConfig::default(),
        );

        let state = orchestrator
            .trigger_manual_failover("eu-west", "drill")
            .await
            .unwrap();
        assert_eq!(state, FailoverState::FailedOver);
        assert_eq!(orchestrator.shifted_percent("eu-west"), 100);
        assert_eq!(sink.count(NotificationKind::Escalation), 1);
    }

    #[tokio::test]
    async fn test_recent_events() {
        let f = fixture(10);
        f.orchestrator
            .trigger_manual_failover("eu-west", "drill")
            .await
            .unwrap();
        let recent = f.orchestrator.recent_events(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].to, FailoverState::FailedOver);
        assert_eq!(f.orchestrator.recent_events(10).len(), 2);
    }
}
