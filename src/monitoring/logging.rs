//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry with an environment filter and
//! either a text or JSON formatter.

use crate::config::LoggingConfig;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Build the filter: `RUST_LOG` wins, then the configured level.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Initialize logging once per process.
///
/// Safe to call repeatedly; a subscriber installed elsewhere (tests,
/// embedding application) is left in place.
pub fn init_logging(config: &LoggingConfig) {
    LOGGING_INITIALIZED.get_or_init(|| {
        let registry = tracing_subscriber::registry().with(build_filter(config));
        let installed = if config.json {
            registry
                .with(fmt::layer().json().with_target(true).with_current_span(false))
                .try_init()
        } else {
            registry
                .with(fmt::layer().with_target(true).with_thread_ids(true))
                .try_init()
        };

        if installed.is_err() {
            tracing::debug!("Tracing subscriber already installed");
        }
    });
}
