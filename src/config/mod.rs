//! Configuration Module
//!
//! Provides the federation configuration:
//! - Region and failover documents
//! - Monitor and routing settings
//! - File loading

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    CapacityConfig, EndpointConfig, FailoverDocument, FailoverPairConfig, FederationConfig,
    GeoPreference, HealthConfig, LoggingConfig, OrchestratorConfig, ProbeProtocol,
    RegionConfig, RegionStatus, ReplicationConfig, ReplicationLinkConfig, ResumePolicy,
    RoutingConfig, ShiftStrategy, StatusConfig, DEFAULT_WEIGHT,
};
