//! Engine runs
//!
//! One run covers every configured make/model pair in a single scope:
//! discovery pages are seeded up front, the pipeline drains through the worker
//! pool (including the verification phase the dispatcher kicks off), a final
//! partial flush is forced, and the workers are stopped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

use super::context::ScrapeContext;
use super::job::Job;
use super::queue::JobQueue;
use super::tracker::ProgressTracker;
use super::worker::spawn_workers;
use crate::domain::Scope;
use crate::infrastructure::{AppConfig, Fetch, ListingExtractor, ListingRepository};

/// What one scope run did, for the caller's final log line.
#[derive(Debug)]
pub struct RunSummary {
    pub scope: Scope,
    pub listings_seen: usize,
    pub jobs_completed: u64,
    pub elapsed: Duration,
}

pub struct ScrapeEngine {
    config: AppConfig,
    fetcher: Arc<dyn Fetch>,
    repo: ListingRepository,
}

impl ScrapeEngine {
    pub fn new(config: AppConfig, fetcher: Arc<dyn Fetch>, repo: ListingRepository) -> Self {
        Self {
            config,
            fetcher,
            repo,
        }
    }

    /// Run discovery plus verification for one scope, to completion.
    pub async fn run_scope(&self, scope: Scope) -> Result<RunSummary> {
        let started = Instant::now();
        let pairs = self.config.search.models.clone();
        let pages_per_pair = self.config.search.pages;
        let total_pages = pairs.len() as u32 * pages_per_pair;

        let extractor = ListingExtractor::new(&self.config.search.base_url)?;
        let tracker = Arc::new(ProgressTracker::new());
        let queue = Arc::new(JobQueue::with_tracker(
            self.config.engine.priorities.clone(),
            Arc::clone(&tracker),
        ));
        let ctx = Arc::new(ScrapeContext::new(
            self.config.clone(),
            scope,
            Arc::clone(&self.fetcher),
            extractor,
            self.repo.clone(),
            total_pages,
            Arc::clone(&tracker),
        ));

        info!(%scope, pairs = pairs.len(), total_pages, "run started");
        let workers = spawn_workers(
            self.config.engine.workers,
            Arc::clone(&ctx),
            Arc::clone(&queue),
        );
        let render = tracker.spawn_render_loop(
            Arc::clone(&queue),
            Duration::from_secs(self.config.engine.render_interval_secs.max(1)),
        );

        if total_pages == 0 {
            // Nothing to discover; verification still runs.
            queue.submit(Job::Verifier);
        }
        for pair in &pairs {
            for page in 1..=pages_per_pair {
                queue.submit(Job::PageLoad {
                    page,
                    pair: pair.clone(),
                });
            }
        }

        // Discovery and verification both drain here; the verifier chain is
        // outstanding work like everything else.
        queue.wait_idle().await;

        // Whatever the listing buffer still holds goes out in one last batch.
        queue.submit(Job::FlushBuffer { batch: None });
        queue.wait_idle().await;

        for _ in 0..self.config.engine.workers {
            queue.submit(Job::Stop);
        }
        for result in futures::future::join_all(workers).await {
            result.context("worker task panicked")?;
        }
        render.abort();

        let summary = RunSummary {
            scope,
            listings_seen: ctx.seen_count(),
            jobs_completed: tracker.completed_total(),
            elapsed: started.elapsed(),
        };
        info!(
            %scope,
            listings = summary.listings_seen,
            jobs = summary.jobs_completed,
            elapsed_s = summary.elapsed.as_secs(),
            "run finished"
        );
        Ok(summary)
    }
}
