//! Shared per-run state
//!
//! One `ScrapeContext` exists per engine run and is shared across the worker
//! pool. Everything mutable inside it sits behind its own short-lived lock;
//! jobs never hold two of these locks at once.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::dispatcher::Dispatcher;
use super::tracker::ProgressTracker;
use crate::domain::{ListingCard, ListingRecord, Scope, StaleListing};
use crate::infrastructure::{AppConfig, Fetch, ListingExtractor, ListingRepository};

/// Accumulates listing records and hands out a full batch on the push that
/// reaches the threshold. The drain happens under the same lock as the push,
/// so the buffer never holds a full batch and each threshold crossing yields
/// exactly one batch.
pub struct ListingBuffer {
    batch_size: usize,
    items: Mutex<Vec<ListingRecord>>,
}

impl ListingBuffer {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            items: Mutex::new(Vec::new()),
        }
    }

    /// Append one record; returns the drained batch when this push fills it.
    pub fn push(&self, record: ListingRecord) -> Option<Vec<ListingRecord>> {
        let mut items = self.items.lock();
        items.push(record);
        if items.len() >= self.batch_size {
            Some(std::mem::take(&mut *items))
        } else {
            None
        }
    }

    /// Take whatever is buffered, full batch or not.
    pub fn drain(&self) -> Vec<ListingRecord> {
        std::mem::take(&mut *self.items.lock())
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Same drain-on-threshold behavior for unresolved result cards.
pub struct CardBuffer {
    batch_size: usize,
    items: Mutex<Vec<ListingCard>>,
}

impl CardBuffer {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, card: ListingCard) -> Option<Vec<ListingCard>> {
        let mut items = self.items.lock();
        items.push(card);
        if items.len() >= self.batch_size {
            Some(std::mem::take(&mut *items))
        } else {
            None
        }
    }

    pub fn drain(&self) -> Vec<ListingCard> {
        std::mem::take(&mut *self.items.lock())
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything a job needs besides the queue itself.
pub struct ScrapeContext {
    pub config: AppConfig,
    pub scope: Scope,
    pub fetcher: Arc<dyn Fetch>,
    pub extractor: ListingExtractor,
    pub repo: ListingRepository,
    pub dispatcher: Dispatcher,
    pub listing_buffer: ListingBuffer,
    pub tracker: Arc<ProgressTracker>,
    seen: Mutex<HashSet<String>>,
    verify_backlog: Mutex<Vec<StaleListing>>,
}

impl ScrapeContext {
    pub fn new(
        config: AppConfig,
        scope: Scope,
        fetcher: Arc<dyn Fetch>,
        extractor: ListingExtractor,
        repo: ListingRepository,
        total_pages: u32,
        tracker: Arc<ProgressTracker>,
    ) -> Self {
        let listing_buffer = ListingBuffer::new(config.engine.listing_batch_size);
        let dispatcher = Dispatcher::new(total_pages, config.engine.unresolved_batch_size);
        Self {
            config,
            scope,
            fetcher,
            extractor,
            repo,
            dispatcher,
            listing_buffer,
            tracker,
            seen: Mutex::new(HashSet::new()),
            verify_backlog: Mutex::new(Vec::new()),
        }
    }

    /// Record a listing id as processed this run. Returns true on the first
    /// sighting, false on every later one.
    pub fn mark_seen(&self, listing_id: &str) -> bool {
        self.seen.lock().insert(listing_id.to_string())
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().len()
    }

    /// Hand the verifier's stale list to the producer chain.
    pub fn stash_verify_backlog(&self, stale: Vec<StaleListing>) {
        *self.verify_backlog.lock() = stale;
    }

    /// Take up to `chunk_size` entries off the backlog; the bool says whether
    /// any remain.
    pub fn pop_verify_chunk(&self, chunk_size: usize) -> (Vec<StaleListing>, bool) {
        let mut backlog = self.verify_backlog.lock();
        let take = chunk_size.max(1).min(backlog.len());
        let chunk = backlog.drain(..take).collect();
        (chunk, !backlog.is_empty())
    }
}
