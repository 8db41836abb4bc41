//! Tracing subscriber setup.

use anyhow::{anyhow, Result};
use neonspark_core::Settings;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `LOG_LEVEL`;
/// production emits JSON lines.
pub fn init(settings: &Settings) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(settings.log_level.to_lowercase())
            .map_err(|e| anyhow!("invalid LOG_LEVEL '{}': {}", settings.log_level, e))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    let installed = if settings.environment.is_production() {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
