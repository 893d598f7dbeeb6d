//! Configuration documents.
//!
//! Region definitions, failover pairs, geo preferences and the runtime
//! settings of every monitor. All fields carry serde defaults so partial
//! documents deserialize.

use crate::core::LatencyPercentiles;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default routing weight when a region does not specify one.
pub const DEFAULT_WEIGHT: f64 = 50.0;

/// Administrative status of a region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionStatus {
    /// Region takes traffic
    #[default]
    Active,
    /// Region is configured but never routed to or probed
    Inactive,
}

/// A reachable endpoint of a region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Protocol label (`https`, `grpc`, `tcp`, ...)
    pub protocol: String,
    /// Address or URL
    pub url: String,
}

/// Capacity of a region.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Maximum concurrent requests
    #[serde(default)]
    pub max_concurrent: u64,
    /// Current load fraction (0-1)
    #[serde(default)]
    pub current_load: f64,
}

/// One region entry in the regions document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: RegionStatus,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub capacity: CapacityConfig,
    #[serde(default)]
    pub latency: LatencyPercentiles,
    #[serde(default)]
    pub compliance: Vec<String>,
    /// Data-sovereignty tag (`EU`, `US`, ...); `None` means unconstrained
    #[serde(default)]
    pub sovereignty: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
}

impl RegionConfig {
    /// Create a minimal active region config.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            status: RegionStatus::Active,
            endpoints: vec![EndpointConfig {
                protocol: "https".to_string(),
                url: format!("https://{}.example.net", id),
            }],
            capacity: CapacityConfig::default(),
            latency: LatencyPercentiles::default(),
            compliance: Vec::new(),
            sovereignty: None,
            weight: None,
        }
    }

    /// Set weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Set sovereignty tag.
    pub fn with_sovereignty(mut self, tag: &str) -> Self {
        self.sovereignty = Some(tag.to_string());
        self
    }

    /// Set status.
    pub fn with_status(mut self, status: RegionStatus) -> Self {
        self.status = status;
        self
    }

    /// Set current load fraction.
    pub fn with_load(mut self, load: f64) -> Self {
        self.capacity.current_load = load;
        self
    }
}

/// Traffic-shift strategy of a failover pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftStrategy {
    /// Move 100% of traffic in one step
    #[default]
    Immediate,
    /// Move traffic through the configured step percentages
    Gradual,
}

impl std::fmt::Display for ShiftStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShiftStrategy::Immediate => write!(f, "immediate"),
            ShiftStrategy::Gradual => write!(f, "gradual"),
        }
    }
}

fn default_steps() -> Vec<u8> {
    vec![10, 25, 50, 100]
}

fn default_step_duration_ms() -> u64 {
    60_000
}

fn default_rto_secs() -> u64 {
    300
}

fn default_rpo_secs() -> u64 {
    60
}

/// A (primary, secondary) failover binding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverPairConfig {
    pub primary: String,
    pub secondary: String,
    #[serde(default)]
    pub strategy: ShiftStrategy,
    #[serde(default = "default_steps")]
    pub steps: Vec<u8>,
    #[serde(default = "default_step_duration_ms")]
    pub step_duration_ms: u64,
    #[serde(default = "default_rto_secs")]
    pub rto_secs: u64,
    #[serde(default = "default_rpo_secs")]
    pub rpo_secs: u64,
}

impl FailoverPairConfig {
    /// Create an immediate pair with default targets.
    pub fn new(primary: &str, secondary: &str) -> Self {
        Self {
            primary: primary.to_string(),
            secondary: secondary.to_string(),
            strategy: ShiftStrategy::Immediate,
            steps: default_steps(),
            step_duration_ms: default_step_duration_ms(),
            rto_secs: default_rto_secs(),
            rpo_secs: default_rpo_secs(),
        }
    }

    /// Switch to a gradual shift with the given steps.
    pub fn gradual(mut self, steps: Vec<u8>, step_duration: Duration) -> Self {
        self.strategy = ShiftStrategy::Gradual;
        self.steps = steps;
        self.step_duration_ms = step_duration.as_millis() as u64;
        self
    }

    pub fn step_duration(&self) -> Duration {
        Duration::from_millis(self.step_duration_ms)
    }
}

/// Ordered region preference for one geographic bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoPreference {
    #[serde(default)]
    pub preferred: Vec<String>,
    #[serde(default)]
    pub fallback: Option<String>,
}

/// A monitored cross-region replication link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationLinkConfig {
    pub source: String,
    pub target: String,
    pub max_lag_ms: u64,
}

/// Failover pairs, geo preferences and replication links.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FailoverDocument {
    #[serde(default)]
    pub pairs: Vec<FailoverPairConfig>,
    #[serde(default)]
    pub geo_preferences: BTreeMap<String, GeoPreference>,
    #[serde(default)]
    pub replication_links: Vec<ReplicationLinkConfig>,
}

/// Built-in liveness probe used by the daemon.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeProtocol {
    /// TCP connect to the first endpoint
    #[default]
    Tcp,
    /// HTTP `GET` against the first `http` endpoint
    Http,
}

/// Health monitor settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub probe: ProbeProtocol,
    /// Path requested by the HTTP probe
    pub http_path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            timeout_ms: 5_000,
            failure_threshold: 3,
            success_threshold: 2,
            probe: ProbeProtocol::Tcp,
            http_path: "/healthz".to_string(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Routing engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Regions at or above this load fraction are not admitted
    pub admission_threshold: f64,
    pub default_weight: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            admission_threshold: 0.85,
            default_weight: DEFAULT_WEIGHT,
        }
    }
}

/// Replication monitor settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub interval_ms: u64,
    /// Per-sample timeout
    pub timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 5_000,
        }
    }
}

impl ReplicationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What to do with a gradual shift interrupted by a restart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Jump to 100% and mark the region failed over
    #[default]
    DeclareFailedOver,
    /// Continue with the remaining steps
    Resume,
}

/// Failover orchestrator settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Restore original weighting as soon as the primary recovers
    pub auto_rebalance: bool,
    pub resume_policy: ResumePolicy,
    /// Directory for shift checkpoints; in-memory when unset
    pub checkpoint_dir: Option<String>,
}

/// Status reporter settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Number of failover events kept in a snapshot
    pub event_history: usize,
    /// Period of the status log line emitted by the daemon
    pub log_interval_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            event_history: 50,
            log_interval_ms: 60_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete federation configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FederationConfig {
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
    #[serde(default)]
    pub failover: FailoverDocument,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}
