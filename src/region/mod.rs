//! Multi-region Module
//!
//! Provides the regional topology:
//! - Immutable region registry
//! - Effective routing view published by failover

pub mod registry;
pub mod view;

pub use registry::{FailoverPair, Region, RegionRegistry};
pub use view::{RoutingView, RoutingViewCell, TrafficShift};
