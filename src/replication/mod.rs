//! Replication Module
//!
//! Provides cross-region replication observation:
//! - Pluggable lag samplers
//! - Edge-triggered lag threshold alerts

pub mod monitor;
pub mod sampler;

pub use monitor::{ReplicationEvent, ReplicationLink, ReplicationMonitor};
pub use sampler::{FixedLagSampler, LagSampler};
