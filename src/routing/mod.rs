//! Routing Module
//!
//! Provides request placement:
//! - Sovereignty-constrained region selection
//! - Geo preference lists with fallback
//! - Weighted random distribution

pub mod engine;
pub mod weighted;

pub use engine::{RoutingDecision, RoutingEngine, SelectionPath};
pub use weighted::weighted_pick;
