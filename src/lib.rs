//! # fedroute - Multi-region federation router
//!
//! Selects a serving region for each request and fails regions over when
//! they degrade:
//! - **Routing**: sovereignty filter, geo preference, weighted fallback
//! - **Health**: pluggable probes with edge-triggered breach/recovery
//! - **Failover**: immediate or gradual traffic shifts to a paired region
//! - **Replication**: lag sampling with threshold alerts
//! - **Status**: read-only snapshot for reporting consumers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fedroute::config::ConfigLoader;
//! use fedroute::health::TcpProbe;
//! use fedroute::monitoring::Notifier;
//! use fedroute::replication::FixedLagSampler;
//! use fedroute::Federation;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> fedroute::Result<()> {
//!     let config = ConfigLoader::from_file("federation.json")?;
//!     let federation = Federation::new(
//!         config,
//!         Arc::new(TcpProbe::new()),
//!         Arc::new(FixedLagSampler::new()),
//!         Notifier::new(),
//!     )?;
//!     federation.start().await?;
//!
//!     let decision = federation.route(Some("europe"), Some("EU"))?;
//!     println!("Routed to {}", decision.region_id);
//!
//!     federation.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod failover;
pub mod federation;
pub mod health;
pub mod monitoring;
pub mod region;
pub mod replication;
pub mod routing;
pub mod status;

pub use core::error::{Error, Result};
pub use federation::Federation;
