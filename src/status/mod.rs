//! Status Module
//!
//! Provides the read-only status snapshot:
//! - Routed and rejected request counts
//! - Health and failover state per region
//! - Recent failover events and replication links

pub mod reporter;

pub use reporter::{RegionStatus, StatusReporter, StatusSnapshot};
