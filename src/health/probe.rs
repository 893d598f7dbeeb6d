//! Liveness probes.
//!
//! A `HealthProbe` checks one region and reports observed latency and,
//! when the region exposes it, its load fraction. Probes never panic on
//! network failure; they return an error that the monitor counts as one
//! failed check.

use crate::config::{HealthConfig, ProbeProtocol};
use crate::core::{Error, LatencyPercentiles, RegionId, Result};
use crate::region::Region;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use url::{Host, Url};

/// Result of a successful probe.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Observed round-trip latency (ms)
    pub latency_ms: f64,
    /// Load fraction reported by the region, if any
    pub load: Option<f64>,
}

impl ProbeReport {
    pub fn with_latency(latency_ms: f64) -> Self {
        Self {
            latency_ms,
            load: None,
        }
    }

    pub fn with_load(mut self, load: f64) -> Self {
        self.load = Some(load);
        self
    }

    pub fn latency(&self) -> LatencyPercentiles {
        LatencyPercentiles::from_sample(self.latency_ms)
    }
}

/// Probe variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeKind {
    Http,
    Tcp,
    Custom,
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeKind::Http => write!(f, "http"),
            ProbeKind::Tcp => write!(f, "tcp"),
            ProbeKind::Custom => write!(f, "custom"),
        }
    }
}

/// Liveness check for a region.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe the region once.
    ///
    /// Ordinary network failures are returned as `Err`, never panics.
    async fn probe(&self, region: &Region) -> Result<ProbeReport>;

    /// Get the probe variant.
    fn kind(&self) -> ProbeKind;
}

/// Parse an endpoint URL. A bare `host:port` is read as `tcp://host:port`.
fn parse_endpoint(raw: &str) -> Result<Url> {
    let parsed = if raw.contains("://") {
        Url::parse(raw)
    } else {
        Url::parse(&format!("tcp://{}", raw))
    };
    parsed.map_err(|e| Error::Probe(format!("invalid endpoint {}: {}", raw, e)))
}

async fn connect(url: &Url) -> Result<TcpStream> {
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::Probe(format!("no port in {}", url)))?;
    let connected = match url.host() {
        Some(Host::Domain(domain)) => TcpStream::connect((domain, port)).await,
        Some(Host::Ipv4(ip)) => TcpStream::connect((ip, port)).await,
        Some(Host::Ipv6(ip)) => TcpStream::connect((ip, port)).await,
        None => return Err(Error::Probe(format!("no host in {}", url))),
    };
    connected.map_err(|e| Error::Probe(format!("{}: {}", url, e)))
}

/// TCP connect probe against the region's primary endpoint.
#[derive(Clone, Debug, Default)]
pub struct TcpProbe;

impl TcpProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn probe(&self, region: &Region) -> Result<ProbeReport> {
        let endpoint = region
            .primary_endpoint()
            .ok_or_else(|| Error::Probe(format!("region {} has no endpoint", region.id)))?;
        let url = parse_endpoint(&endpoint.url)?;

        let started = Instant::now();
        connect(&url).await?;

        Ok(ProbeReport::with_latency(started.elapsed().as_secs_f64() * 1000.0))
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Tcp
    }
}

/// HTTP `GET` probe; any 2xx status is healthy.
///
/// Uses the region's first `http` or `https` endpoint with `path` appended.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    client: Client,
    path: String,
}

impl HttpProbe {
    pub fn new(path: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("fedroute/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("http probe client: {}", e)))?;
        Ok(Self {
            client,
            path: path.to_string(),
        })
    }

    fn target(&self, raw: &str) -> Result<Url> {
        let mut url = parse_endpoint(raw)?;
        let path = format!("{}{}", url.path().trim_end_matches('/'), self.path);
        url.set_path(&path);
        Ok(url)
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, region: &Region) -> Result<ProbeReport> {
        let endpoint = region
            .endpoints
            .iter()
            .find(|e| {
                e.protocol.eq_ignore_ascii_case("http") || e.protocol.eq_ignore_ascii_case("https")
            })
            .ok_or_else(|| Error::Probe(format!("region {} has no http endpoint", region.id)))?;
        let url = self.target(&endpoint.url)?;

        let started = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Probe(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Probe(format!("{}: status {}", url, status)));
        }
        Ok(ProbeReport::with_latency(started.elapsed().as_secs_f64() * 1000.0))
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Http
    }
}

/// Build the built-in probe selected in configuration.
pub fn probe_from_config(config: &HealthConfig) -> Result<Arc<dyn HealthProbe>> {
    Ok(match config.probe {
        ProbeProtocol::Tcp => Arc::new(TcpProbe::new()),
        ProbeProtocol::Http => Arc::new(HttpProbe::new(&config.http_path)?),
    })
}

/// Probe backed by a caller-supplied check.
pub struct FnProbe<F> {
    check: F,
}

impl<F> FnProbe<F>
where
    F: Fn(&Region) -> Result<ProbeReport> + Send + Sync + 'static,
{
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

#[async_trait]
impl<F> HealthProbe for FnProbe<F>
where
    F: Fn(&Region) -> Result<ProbeReport> + Send + Sync + 'static,
{
    async fn probe(&self, region: &Region) -> Result<ProbeReport> {
        (self.check)(region)
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Custom
    }
}

/// Scripted outcome for `ScriptedProbe`.
#[derive(Clone, Debug)]
pub enum ScriptedOutcome {
    Up(ProbeReport),
    Down,
    /// Never answers within any reasonable timeout
    Hang,
}

/// Deterministic probe for simulations and tests.
///
/// Queued outcomes are consumed first; once a region's queue is empty the
/// region's standing outcome is repeated. Regions default to up.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    queued: Mutex<HashMap<RegionId, VecDeque<ScriptedOutcome>>>,
    standing: Mutex<HashMap<RegionId, ScriptedOutcome>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the standing outcome of a region.
    pub fn set(&self, region: &str, outcome: ScriptedOutcome) {
        self.standing.lock().insert(region.to_string(), outcome);
    }

    pub fn set_up(&self, region: &str) {
        self.set(region, ScriptedOutcome::Up(ProbeReport::with_latency(10.0)));
    }

    pub fn set_down(&self, region: &str) {
        self.set(region, ScriptedOutcome::Down);
    }

    /// Queue one-shot outcomes ahead of the standing one.
    pub fn push(&self, region: &str, outcomes: impl IntoIterator<Item = ScriptedOutcome>) {
        self.queued
            .lock()
            .entry(region.to_string())
            .or_default()
            .extend(outcomes);
    }

    fn next(&self, region: &str) -> ScriptedOutcome {
        if let Some(outcome) = self.queued.lock().get_mut(region).and_then(|q| q.pop_front()) {
            return outcome;
        }
        self.standing
            .lock()
            .get(region)
            .cloned()
            .unwrap_or_else(|| ScriptedOutcome::Up(ProbeReport::with_latency(10.0)))
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, region: &Region) -> Result<ProbeReport> {
        match self.next(&region.id) {
            ScriptedOutcome::Up(report) => Ok(report),
            ScriptedOutcome::Down => Err(Error::Probe(format!("{} is down", region.id))),
            ScriptedOutcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::Probe(format!("{} hung", region.id)))
            }
        }
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Custom
    }
}
