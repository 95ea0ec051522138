//! Process-wide logging setup.
//!
//! The library logs through the `log` facade and opens `tracing` spans; this
//! installs one `tracing` subscriber for both and bridges `log` records into it.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::LogFormat;
use crate::error::{Result, WatchError};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "fpwatch=info";

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(format: LogFormat) -> Result<()> {
    init_logging_with_filter(format, DEFAULT_FILTER)
}

pub fn init_logging_with_filter(format: LogFormat, default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = Registry::default().with(filter);

    let installed = match format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        ),
        LogFormat::Pretty => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(true)))
        }
    };
    installed.map_err(|e| WatchError::Logging(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| WatchError::Logging(e.to_string()))?;
    Ok(())
}
