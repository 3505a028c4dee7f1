//! # Structured Logging
//!
//! Provides structured logging setup using the tracing ecosystem.

use crate::errors::{Error, Result};
use once_cell::sync::OnceCell;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

static LOGGING_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging behavior selected from the CLI.
#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Lower the filter floor to `debug`.
    pub debug: bool,
    /// With `debug`, lower the floor further to `trace`.
    pub verbose: bool,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl LoggingOptions {
    fn default_directive(&self) -> &'static str {
        match (self.debug, self.verbose) {
            (true, true) => "trace",
            (true, false) => "debug",
            _ => "info",
        }
    }
}

/// Initialize structured logging once for the process.
///
/// `RUST_LOG` wins over the CLI flags when set, so operators can still
/// target individual modules.
pub fn init_logging(options: &LoggingOptions) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_directive()));

    LOGGING_INITIALIZED
        .get_or_try_init(|| configure_logging(options, env_filter))
        .map(|_| ())
}

fn configure_logging(options: &LoggingOptions, env_filter: EnvFilter) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter);

    if options.json {
        let json_layer = fmt::layer().json().flatten_event(true).with_current_span(false);

        registry
            .with(json_layer)
            .try_init()
            .map_err(|e| Error::config(format!("Failed to initialize logging: {}", e)))?;
    } else {
        let pretty_layer = fmt::layer().with_target(true);

        registry
            .with(pretty_layer)
            .try_init()
            .map_err(|e| Error::config(format!("Failed to initialize logging: {}", e)))?;
    }

    Ok(())
}
