//! Job variants and their execution
//!
//! Jobs are data-only variants of one enum; the worker loop passes the shared
//! run context and the queue into `execute`, which emits downstream jobs as it
//! goes. A failed job is logged and counted complete - the pipeline absorbs
//! failure by simply not emitting the next stage.

use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use tracing::{debug, info, warn};
use url::Url;

use super::context::ScrapeContext;
use super::queue::JobQueue;
use crate::domain::{ListingCard, ListingRecord, ModelQuery, Scope};

/// Discriminant used for priorities and progress tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobKind {
    PageLoad,
    ListingResolution,
    DetailScrape,
    Save,
    FlushBuffer,
    Verifier,
    VerifierProducer,
    VerifyDetail,
    Stop,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobKind::PageLoad => "PageLoad",
            JobKind::ListingResolution => "ListingResolution",
            JobKind::DetailScrape => "DetailScrape",
            JobKind::Save => "Save",
            JobKind::FlushBuffer => "FlushBuffer",
            JobKind::Verifier => "Verifier",
            JobKind::VerifierProducer => "VerifierProducer",
            JobKind::VerifyDetail => "VerifyDetail",
            JobKind::Stop => "Stop",
        };
        f.write_str(name)
    }
}

/// One schedulable unit of pipeline work.
#[derive(Debug)]
pub enum Job {
    /// Load one results page and forward its cards for resolution.
    PageLoad { page: u32, pair: ModelQuery },
    /// Resolve a batch of cards against known listing_id -> vin mappings.
    ListingResolution { batch: Vec<ListingCard> },
    /// Fetch and parse the detail page for a listing with no known vin.
    DetailScrape { card: ListingCard },
    /// Buffer one record for batched persistence.
    Save { record: ListingRecord },
    /// Write a batch (or whatever the buffer currently holds) to persistence.
    FlushBuffer { batch: Option<Vec<ListingRecord>> },
    /// Pull stale active listings and start the verification phase.
    Verifier,
    /// Emit one chunk of VerifyDetail jobs, re-enqueueing itself while the
    /// backlog lasts.
    VerifierProducer,
    /// Re-check one previously seen listing.
    VerifyDetail { vin: String, url: String },
    /// Sentinel: the receiving worker exits without re-enqueueing.
    Stop,
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::PageLoad { .. } => JobKind::PageLoad,
            Job::ListingResolution { .. } => JobKind::ListingResolution,
            Job::DetailScrape { .. } => JobKind::DetailScrape,
            Job::Save { .. } => JobKind::Save,
            Job::FlushBuffer { .. } => JobKind::FlushBuffer,
            Job::Verifier => JobKind::Verifier,
            Job::VerifierProducer => JobKind::VerifierProducer,
            Job::VerifyDetail { .. } => JobKind::VerifyDetail,
            Job::Stop => JobKind::Stop,
        }
    }

    /// Run this job to completion. Errors are recoverable: the worker logs
    /// them and the pipeline continues without the downstream jobs this one
    /// would have emitted.
    pub async fn execute(self, ctx: &Arc<ScrapeContext>, queue: &Arc<JobQueue>) -> Result<()> {
        match self {
            Job::PageLoad { page, pair } => page_load(ctx, queue, page, &pair).await,
            Job::ListingResolution { batch } => listing_resolution(ctx, queue, batch).await,
            Job::DetailScrape { card } => detail_scrape(ctx, queue, card).await,
            Job::Save { record } => save(ctx, queue, record),
            Job::FlushBuffer { batch } => flush_buffer(ctx, batch).await,
            Job::Verifier => verifier(ctx, queue).await,
            Job::VerifierProducer => verifier_producer(ctx, queue),
            Job::VerifyDetail { vin, url } => verify_detail(ctx, queue, vin, url).await,
            // Stop is consumed by the worker loop and never executed.
            Job::Stop => Ok(()),
        }
    }
}

/// Build the results-page URL for one (pair, page) in the run's scope.
pub fn results_url(ctx: &ScrapeContext, pair: &ModelQuery, page: u32) -> Result<String> {
    let search = &ctx.config.search;
    let max_distance = match ctx.scope {
        Scope::Local => search.radius_miles.to_string(),
        Scope::National => "all".to_string(),
    };
    let url = Url::parse_with_params(
        &search.base_url,
        &[
            ("makes[]", pair.make.as_str()),
            ("models[]", pair.model.as_str()),
            ("stock_type", "new"),
            ("zip", search.zip.as_str()),
            ("page", &page.to_string()),
            ("page_size", &search.page_size.to_string()),
            ("maximum_distance", &max_distance),
        ],
    )?;
    Ok(url.to_string())
}

async fn page_load(
    ctx: &Arc<ScrapeContext>,
    queue: &Arc<JobQueue>,
    page: u32,
    pair: &ModelQuery,
) -> Result<()> {
    let result = match results_url(ctx, pair, page) {
        Ok(url) => ctx.fetcher.fetch(&url).await.map(|out| (url, out)),
        Err(e) => {
            // Malformed config; still counts as a completed page.
            ctx.dispatcher.notify_page_complete(queue);
            return Err(e);
        }
    };

    match result {
        Ok((url, outcome)) => {
            let cards = ctx.extractor.extract_cards(&outcome.body);
            debug!(
                page,
                model = %pair.model,
                cards = cards.len(),
                tier = %outcome.tier,
                %url,
                "results page loaded"
            );
            for card in cards {
                ctx.dispatcher.add_unresolved(queue, card);
            }
        }
        Err(e) => {
            warn!(page, model = %pair.model, "failed to fetch results page: {e}");
        }
    }

    // Exactly once per page, success or not; the dispatcher's countdown is the
    // phase signal for the whole run.
    ctx.dispatcher.notify_page_complete(queue);
    Ok(())
}

async fn listing_resolution(
    ctx: &Arc<ScrapeContext>,
    queue: &Arc<JobQueue>,
    batch: Vec<ListingCard>,
) -> Result<()> {
    let ids: Vec<String> = batch.iter().map(|c| c.listing_id.clone()).collect();
    let known = ctx.repo.lookup_vins_by_listing_ids(&ids).await?;
    let today = Local::now().date_naive();

    let mut cheap = 0usize;
    let mut detail = 0usize;
    for card in batch {
        // First sighting wins; later duplicates of the same listing_id in this
        // run do no further work.
        if !ctx.mark_seen(&card.listing_id) {
            continue;
        }
        if let Some(vin) = known.get(&card.listing_id) {
            cheap += 1;
            queue.submit(Job::Save {
                record: ListingRecord::price_update(vin, &card, ctx.scope, today),
            });
        } else {
            detail += 1;
            queue.submit(Job::DetailScrape { card });
        }
    }
    debug!(cheap, detail, "listing batch resolved");
    Ok(())
}

async fn detail_scrape(
    ctx: &Arc<ScrapeContext>,
    queue: &Arc<JobQueue>,
    card: ListingCard,
) -> Result<()> {
    let outcome = match ctx.fetcher.fetch(&card.url).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // No retry scheduling: the listing is deferred to a future sweep.
            warn!(listing_id = %card.listing_id, "detail fetch failed, deferring: {e}");
            return Ok(());
        }
    };

    let detail = ctx.extractor.extract_detail(&outcome.body);
    let Some(vin) = detail.vin.clone() else {
        warn!(listing_id = %card.listing_id, "detail page had no vin, skipping");
        return Ok(());
    };

    let today = Local::now().date_naive();
    let record = ListingRecord::from_detail(
        &card,
        &detail,
        vin,
        ctx.config.search.shipping_cost_per_mile,
        ctx.scope,
        today,
    );
    queue.submit(Job::Save { record });
    Ok(())
}

fn save(ctx: &Arc<ScrapeContext>, queue: &Arc<JobQueue>, record: ListingRecord) -> Result<()> {
    // The Nth append drains the buffer under its lock and hands the batch to
    // exactly one flush job, so the buffer never holds a full batch for long.
    if let Some(batch) = ctx.listing_buffer.push(record) {
        queue.submit(Job::FlushBuffer { batch: Some(batch) });
    }
    Ok(())
}

async fn flush_buffer(ctx: &Arc<ScrapeContext>, batch: Option<Vec<ListingRecord>>) -> Result<()> {
    let batch = match batch {
        Some(batch) => batch,
        None => ctx.listing_buffer.drain(),
    };
    if batch.is_empty() {
        return Ok(());
    }

    ctx.repo.upsert_listings(&batch).await?;

    let today = Local::now().date_naive();
    for rec in &batch {
        if let Some(price) = rec.price {
            ctx.repo.append_price_if_absent(&rec.vin, today, price).await?;
        }
    }
    info!(count = batch.len(), "listing batch flushed");
    Ok(())
}

async fn verifier(ctx: &Arc<ScrapeContext>, queue: &Arc<JobQueue>) -> Result<()> {
    let today = Local::now().date_naive();
    let stale = ctx.repo.get_stale_active_listings(today).await?;
    info!(count = stale.len(), "verification phase started");
    ctx.stash_verify_backlog(stale);
    queue.submit(Job::VerifierProducer);
    Ok(())
}

/// Bounded self-perpetuation: emit one chunk per round instead of holding the
/// whole stale list in flight at once.
fn verifier_producer(ctx: &Arc<ScrapeContext>, queue: &Arc<JobQueue>) -> Result<()> {
    let (chunk, more) = ctx.pop_verify_chunk(ctx.config.engine.verify_chunk_size);
    for stale in chunk {
        queue.submit(Job::VerifyDetail {
            vin: stale.vin,
            url: stale.url,
        });
    }
    if more {
        queue.submit(Job::VerifierProducer);
    }
    Ok(())
}

async fn verify_detail(
    ctx: &Arc<ScrapeContext>,
    queue: &Arc<JobQueue>,
    vin: String,
    url: String,
) -> Result<()> {
    let outcome = match ctx.fetcher.fetch(&url).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(%vin, "verification fetch failed: {e}");
            return Ok(());
        }
    };

    let detail = ctx.extractor.extract_detail(&outcome.body);
    let record = if detail.is_still_listed {
        ListingRecord::verified_active(&vin, detail.price, Local::now().date_naive())
    } else {
        info!(%vin, "listing no longer on site, marking inactive");
        ListingRecord::verified_inactive(&vin)
    };
    queue.submit(Job::Save { record });
    Ok(())
}
