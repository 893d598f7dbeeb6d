//! Monitoring Module
//!
//! Provides observability for the router:
//! - Notification sinks and alert severities
//! - Structured logging setup
//! - Routing counters

pub mod logging;
pub mod metrics;
pub mod notify;

pub use logging::init_logging;
pub use metrics::{Counter, RegionCounters};
pub use notify::{
    AlertSeverity, MemorySink, Notification, NotificationKind, NotificationSink, Notifier,
    TracingSink,
};
