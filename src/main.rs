//! Lotwatch entry point
//!
//! One invocation performs two full sweeps - local radius first, then
//! nationwide - and exits. Scheduling across days is left to cron or a systemd
//! timer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use lotwatch::domain::Scope;
use lotwatch::engine::ScrapeEngine;
use lotwatch::infrastructure::logging::init_logging;
use lotwatch::infrastructure::{
    AppConfig, Fetch, IdentityStore, ListingRepository, TieredFetcher,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    // Optional single argument: path to a TOML config file.
    let config_path: Option<PathBuf> = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;

    let repo = ListingRepository::connect(&config.storage.database_url)
        .await
        .context("failed to open database")?;
    repo.init_schema().await?;

    let identities = Arc::new(IdentityStore::load(Path::new(&config.storage.identity_dir))?);
    let fetcher = Arc::new(TieredFetcher::new(
        config.fetch.clone(),
        Arc::clone(&identities),
    )?);

    let engine = ScrapeEngine::new(
        config,
        Arc::clone(&fetcher) as Arc<dyn Fetch>,
        repo,
    );
    for scope in [Scope::Local, Scope::National] {
        engine.run_scope(scope).await?;
    }

    identities.flush()?;
    let stats = fetcher.stats();
    info!(
        requests = stats.requests,
        kib = stats.bytes / 1024,
        browser_renders = stats.browser_renders,
        "network totals"
    );
    Ok(())
}
