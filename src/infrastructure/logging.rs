//! Logging initialization
//!
//! Console logging through `tracing-subscriber` with an env-filter override
//! (`RUST_LOG`). Progress rendering from the tracker goes through the same
//! subscriber, so one filter controls everything.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; later calls fail and are ignored by tests.
pub fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lotwatch=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    Ok(())
}
