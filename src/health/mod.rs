//! Health Module
//!
//! Provides region health tracking:
//! - Pluggable liveness probes
//! - Consecutive failure/success accounting
//! - Edge-triggered breach and recovery events

pub mod monitor;
pub mod probe;

pub use monitor::{HealthEvent, HealthMonitor, RegionHealth};
pub use probe::{
    probe_from_config, FnProbe, HealthProbe, HttpProbe, ProbeKind, ProbeReport, ScriptedOutcome,
    ScriptedProbe, TcpProbe,
};
