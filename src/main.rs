//! fedroute daemon.
//!
//! Usage: `fedroute <config.json> [failover.json]`

use fedroute::config::{ConfigLoader, FederationConfig, LoggingConfig};
use fedroute::health::probe_from_config;
use fedroute::monitoring::{init_logging, Notifier, TracingSink};
use fedroute::replication::FixedLagSampler;
use fedroute::{Federation, Result};
use std::sync::Arc;
use tracing::{error, info};

fn load_config(args: &[String]) -> Result<FederationConfig> {
    match args {
        [config] => ConfigLoader::from_file(config),
        [config, failover] => ConfigLoader::from_files(config, failover),
        _ => Err(fedroute::Error::config(
            "usage: fedroute <config.json> [failover.json]",
        )),
    }
}

/// Configuration errors exit with 2, anything else with 1.
fn exit_code(err: &fedroute::Error) -> i32 {
    if err.is_fatal() {
        2
    } else {
        1
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

async fn run(config: FederationConfig) -> Result<()> {
    let probe = probe_from_config(&config.health)?;
    info!(probe = %probe.kind(), regions = config.regions.len(), "Starting fedroute");
    // Lag sources are supplied by embedding applications; the daemon
    // reports zero lag for every link.
    let sampler = Arc::new(FixedLagSampler::new());
    let notifier = Notifier::new().with_sink(Arc::new(TracingSink));

    let federation = Federation::new(config, probe, sampler, notifier)?;
    federation.start().await?;
    info!("fedroute running, press Ctrl+C to stop");

    shutdown_signal().await;
    federation.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            init_logging(&LoggingConfig::default());
            error!(error = %e, "Failed to load configuration");
            std::process::exit(exit_code(&e));
        }
    };
    init_logging(&config.logging);

    if let Err(e) = run(config).await {
        error!(error = %e, fatal = e.is_fatal(), "fedroute stopped with an error");
        std::process::exit(exit_code(&e));
    }
}
