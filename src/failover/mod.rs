//! Failover Module
//!
//! Provides regional failover:
//! - Per-region failover state machine
//! - Immediate and gradual traffic shifts
//! - Shift checkpoints for restart recovery

pub mod checkpoint;
pub mod orchestrator;
pub mod state;

pub use checkpoint::{
    CheckpointStore, JsonFileCheckpointStore, MemoryCheckpointStore, ShiftCheckpoint, ShiftLease,
};
pub use orchestrator::FailoverOrchestrator;
pub use state::{FailoverEvent, FailoverState, FailoverTrigger};
