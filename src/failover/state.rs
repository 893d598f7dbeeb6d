//! Failover states and the event log entry.

use crate::config::{FailoverPairConfig, ShiftStrategy};
use crate::core::{now, RegionId, Timestamp};
use serde::{Deserialize, Serialize};

/// Per-region failover state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverState {
    /// Serving its own traffic
    #[default]
    Stable,
    /// Traffic shift to the secondary in progress
    FailingOver,
    /// All traffic on the secondary
    FailedOver,
    /// Primary healthy again, waiting for rebalance
    Recovering,
}

impl FailoverState {
    /// Check if a new failover may start.
    pub fn accepts_failover(&self) -> bool {
        matches!(self, FailoverState::Stable)
    }
}

impl std::fmt::Display for FailoverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailoverState::Stable => write!(f, "stable"),
            FailoverState::FailingOver => write!(f, "failing_over"),
            FailoverState::FailedOver => write!(f, "failed_over"),
            FailoverState::Recovering => write!(f, "recovering"),
        }
    }
}

/// What caused a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverTrigger {
    HealthBreach,
    Manual,
    ShiftCompleted,
    HealthRecovered,
    Rebalance,
    /// Restored from a checkpoint at startup
    Resume,
}

/// One entry of the append-only failover log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailoverEvent {
    /// Event ID
    pub id: String,
    /// Event time
    pub timestamp: Timestamp,
    /// Primary region
    pub source: RegionId,
    /// Secondary region
    pub target: RegionId,
    pub from: FailoverState,
    pub to: FailoverState,
    pub reason: String,
    pub trigger: FailoverTrigger,
    pub strategy: ShiftStrategy,
    /// Recovery time objective at time of trigger
    pub rto_secs: u64,
    /// Recovery point objective at time of trigger
    pub rpo_secs: u64,
    /// Share of primary traffic on the secondary after the transition
    pub shift_percent: u8,
}

impl FailoverEvent {
    /// Create an event for a transition of `pair`'s primary.
    pub fn new(
        pair: &FailoverPairConfig,
        from: FailoverState,
        to: FailoverState,
        trigger: FailoverTrigger,
        reason: &str,
        shift_percent: u8,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now(),
            source: pair.primary.clone(),
            target: pair.secondary.clone(),
            from,
            to,
            reason: reason.to_string(),
            trigger,
            strategy: pair.strategy,
            rto_secs: pair.rto_secs,
            rpo_secs: pair.rpo_secs,
            shift_percent,
        }
    }
}
