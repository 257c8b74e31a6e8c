//! Configuration loading and management
//!
//! All settings are read once at startup from an optional TOML file layered over
//! built-in defaults. Nothing here is mutated after the engine starts.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::ModelQuery;
use crate::engine::JobKind;

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// What to search for and where.
    pub search: SearchConfig,

    /// Scheduler and batching knobs.
    pub engine: EngineConfig,

    /// Fetch-resilience settings.
    pub fetch: FetchSettings,

    /// Database and identity-store locations.
    pub storage: StorageConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            engine: EngineConfig::default(),
            fetch: FetchSettings::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, falling back to defaults when the file is
    /// absent. Unknown keys are ignored; missing keys take their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.to_path_buf()).required(false),
            );
        }
        let cfg: AppConfig = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        info!(
            models = cfg.search.models.len(),
            pages = cfg.search.pages,
            workers = cfg.engine.workers,
            "configuration loaded"
        );
        Ok(cfg)
    }
}

/// Search parameters for the marketplace query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Base URL of the search results endpoint.
    pub base_url: String,

    /// Home ZIP code anchoring the local search radius.
    pub zip: String,

    /// Maximum distance in miles for the local scope.
    pub radius_miles: u32,

    /// Cost per mile used to estimate vehicle shipping.
    pub shipping_cost_per_mile: f64,

    /// Number of result pages to load per make/model pair.
    pub pages: u32,

    /// Listings per page requested from the site.
    pub page_size: u32,

    /// Tracked make/model pairs.
    pub models: Vec<ModelQuery>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.cars.com/shopping/results/".to_string(),
            zip: "77080".to_string(),
            radius_miles: 300,
            shipping_cost_per_mile: 0.70,
            pages: 5,
            page_size: 100,
            models: vec![ModelQuery {
                make: "honda".to_string(),
                model: "honda-cr_v_hybrid".to_string(),
            }],
        }
    }
}

/// Worker pool, batching, and progress-reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed worker-pool size. Also the effective cap on in-flight fetches.
    pub workers: usize,

    /// Listing buffer size before a flush job is emitted.
    pub listing_batch_size: usize,

    /// Unresolved-card buffer size before a resolution job is emitted.
    pub unresolved_batch_size: usize,

    /// VerifyDetail jobs emitted per producer round.
    pub verify_chunk_size: usize,

    /// Interval between progress renders, in seconds.
    pub render_interval_secs: u64,

    /// Static per-job-type priorities (lower value is served first).
    pub priorities: PriorityTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            listing_batch_size: 50,
            unresolved_batch_size: 25,
            verify_chunk_size: 10,
            render_interval_secs: 5,
            priorities: PriorityTable::default(),
        }
    }
}

/// Static priority per job type. Discovery and resolution are front-loaded so
/// the unresolved buffer keeps draining; saves and flushes run last so batches
/// fill before writing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityTable {
    pub page_load: u8,
    pub listing_resolution: u8,
    pub detail_scrape: u8,
    pub verifier: u8,
    pub verifier_producer: u8,
    pub verify_detail: u8,
    pub save: u8,
    pub flush_buffer: u8,
}

impl PriorityTable {
    /// Static priority for a job type. `Stop` pins to the maximum so workers
    /// only see it once real work has drained.
    pub fn priority_of(&self, kind: JobKind) -> u8 {
        match kind {
            JobKind::PageLoad => self.page_load,
            JobKind::ListingResolution => self.listing_resolution,
            JobKind::DetailScrape => self.detail_scrape,
            JobKind::Verifier => self.verifier,
            JobKind::VerifierProducer => self.verifier_producer,
            JobKind::VerifyDetail => self.verify_detail,
            JobKind::Save => self.save,
            JobKind::FlushBuffer => self.flush_buffer,
            JobKind::Stop => u8::MAX,
        }
    }
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self {
            page_load: 10,
            listing_resolution: 20,
            detail_scrape: 30,
            verifier: 40,
            verifier_producer: 41,
            verify_detail: 42,
            save: 50,
            flush_buffer: 60,
        }
    }
}

/// Fetch-resilience layer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Attempts with previously known-good identities (tier 1).
    pub known_identity_attempts: usize,

    /// Attempts with freshly generated identities (tier 2).
    pub fresh_identity_attempts: usize,

    /// Attempts through the challenge-bypass client (tier 3).
    pub challenge_attempts: usize,

    /// Per-request timeout in seconds for the direct tiers.
    pub request_timeout_secs: u64,

    /// Randomized inter-attempt delay bounds in milliseconds.
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,

    /// Chromium binary used by the headless-browser tier.
    pub chromium_binary: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            known_identity_attempts: 5,
            fresh_identity_attempts: 5,
            challenge_attempts: 2,
            request_timeout_secs: 10,
            jitter_min_ms: 400,
            jitter_max_ms: 1600,
            chromium_binary: "chromium".to_string(),
        }
    }
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite connection string.
    pub database_url: String,

    /// Directory holding the identity-reputation log files.
    pub identity_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/lotwatch.db".to_string(),
            identity_dir: "data".to_string(),
        }
    }
}
