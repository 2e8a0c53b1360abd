//! Tracing subscriber setup for hosts embedding the engine.
//!
//! Only the outermost entry point should call [`init`]; library code just
//! emits `tracing` events.

use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use walkgraph_config::{LogFormat, LoggingConfig};

/// Build the event filter: `RUST_LOG` wins over the configured level.
pub fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a global stderr subscriber.
///
/// Returns `false` when another subscriber was already installed; events
/// then go to that one.
pub fn init(config: &LoggingConfig) -> bool {
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter(config))
        .with_writer(std::io::stderr);

    let installed = match config.format {
        LogFormat::Text => builder.with_ansi(true).try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };
    if !installed {
        warn!("Using existing tracing subscriber");
    }
    installed
}
