//! Structured logging setup.
//!
//! `RUST_LOG` takes precedence over the configured level so a running
//! deployment can be made more verbose without editing its config.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Later calls are no-ops.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails only if a subscriber is already installed
    let _ = if config.json_format {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };

    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
}
