//! Operational notifications.
//!
//! Health transitions, failover transitions, escalations and replication
//! alerts are emitted as structured `Notification`s to fire-and-forget
//! sinks (mail, chat, pager adapters live outside this crate).

use crate::config::ShiftStrategy;
use crate::core::{now, RegionId, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Alert severity level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Critical
    Critical,
    /// Needs a human now
    Emergency,
}

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    HealthBreach,
    HealthRecovered,
    FailoverTransition,
    TrafficShift,
    Escalation,
    ReplicationLagExceeded,
    ReplicationLagCleared,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NotificationKind::HealthBreach => "health_breach",
            NotificationKind::HealthRecovered => "health_recovered",
            NotificationKind::FailoverTransition => "failover_transition",
            NotificationKind::TrafficShift => "traffic_shift",
            NotificationKind::Escalation => "escalation",
            NotificationKind::ReplicationLagExceeded => "replication_lag_exceeded",
            NotificationKind::ReplicationLagCleared => "replication_lag_cleared",
        };
        write!(f, "{}", name)
    }
}

/// A structured notification payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    /// Notification ID
    pub id: String,
    /// Timestamp
    pub timestamp: Timestamp,
    /// Region concerned
    pub region: RegionId,
    /// Event type
    pub kind: NotificationKind,
    /// Severity
    pub severity: AlertSeverity,
    /// Human-readable reason
    pub reason: String,
    /// Failover strategy in effect
    pub strategy: Option<ShiftStrategy>,
    /// Recovery time objective (seconds)
    pub rto_secs: Option<u64>,
    /// Recovery point objective (seconds)
    pub rpo_secs: Option<u64>,
    /// Extra structured fields
    pub details: BTreeMap<String, serde_json::Value>,
}

impl Notification {
    /// Create a new notification.
    pub fn new(kind: NotificationKind, region: &str, reason: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now(),
            region: region.to_string(),
            kind,
            severity: AlertSeverity::Info,
            reason: reason.to_string(),
            strategy: None,
            rto_secs: None,
            rpo_secs: None,
            details: BTreeMap::new(),
        }
    }

    /// Set severity.
    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Attach failover strategy and RTO/RPO targets.
    pub fn with_failover(mut self, strategy: ShiftStrategy, rto_secs: u64, rpo_secs: u64) -> Self {
        self.strategy = Some(strategy);
        self.rto_secs = Some(rto_secs);
        self.rpo_secs = Some(rpo_secs);
        self
    }

    /// Add a structured detail.
    pub fn with_detail(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.insert(key.to_string(), v);
        }
        self
    }
}

/// Destination for notifications.
///
/// Implementations must not block; anything slow belongs on a spawned task.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);

    fn name(&self) -> &str {
        "sink"
    }
}

/// Sink that writes notifications to the tracing subscriber.
#[derive(Clone, Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, n: &Notification) {
        match n.severity {
            AlertSeverity::Info => {
                info!(region = %n.region, kind = %n.kind, reason = %n.reason, "notification")
            }
            AlertSeverity::Warning => {
                warn!(region = %n.region, kind = %n.kind, reason = %n.reason, "notification")
            }
            AlertSeverity::Critical | AlertSeverity::Emergency => {
                error!(region = %n.region, kind = %n.kind, reason = %n.reason, "notification")
            }
        }
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Sink that keeps the most recent notifications in memory.
#[derive(Debug)]
pub struct MemorySink {
    buffer: Mutex<Vec<Notification>>,
    max_buffer: usize,
}

impl MemorySink {
    pub fn new(max_buffer: usize) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            max_buffer,
        }
    }

    /// Get buffered notifications, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.buffer.lock().clone()
    }

    /// Get notifications of one kind.
    pub fn of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.buffer
            .lock()
            .iter()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }

    /// Count notifications of one kind.
    pub fn count(&self, kind: NotificationKind) -> usize {
        self.buffer.lock().iter().filter(|n| n.kind == kind).count()
    }

    /// Clear the buffer.
    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notification: &Notification) {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.max_buffer {
            buffer.remove(0);
        }
        buffer.push(notification.clone());
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Fan-out to every registered sink.
#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifier {
    /// Notifier with no sinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Deliver to every sink.
    pub fn notify(&self, notification: Notification) {
        for sink in &self.sinks {
            sink.notify(&notification);
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("Notifier").field("sinks", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_builder() {
        let n = Notification::new(NotificationKind::Escalation, "eu-west", "no pair")
            .with_severity(AlertSeverity::Critical)
            .with_failover(ShiftStrategy::Gradual, 300, 60)
            .with_detail("secondary", "eu-central");

        assert_eq!(n.kind, NotificationKind::Escalation);
        assert_eq!(n.severity, AlertSeverity::Critical);
        assert_eq!(n.rto_secs, Some(300));
        assert_eq!(n.details["secondary"], "eu-central");
    }

    #[test]
    fn test_notifier_fans_out() {
        let a = Arc::new(MemorySink::default());
        let b = Arc::new(MemorySink::default());
        let notifier = Notifier::new().with_sink(a.clone()).with_sink(b.clone());

        notifier.notify(Notification::new(NotificationKind::HealthBreach, "r1", "down"));

        assert_eq!(a.count(NotificationKind::HealthBreach), 1);
        assert_eq!(b.notifications().len(), 1);
        assert_eq!(notifier.sink_count(), 2);
    }

    #[test]
    fn test_memory_sink_bounded() {
        let sink = MemorySink::new(2);
        for i in 0..3 {
            sink.notify(&Notification::new(
                NotificationKind::TrafficShift,
                &format!("r{}", i),
                "step",
            ));
        }
        let regions: Vec<_> = sink.notifications().into_iter().map(|n| n.region).collect();
        assert_eq!(regions, vec!["r1", "r2"]);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Info < AlertSeverity::Warning);
        assert!(AlertSeverity::Critical < AlertSeverity::Emergency);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&NotificationKind::ReplicationLagExceeded).unwrap();
        assert_eq!(json, "\"replication_lag_exceeded\"");
        assert_eq!(NotificationKind::HealthBreach.to_string(), "health_breach");
    }
}
