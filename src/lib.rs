//! Lotwatch - Vehicle Listing Price Tracker
//!
//! This application collects, deduplicates, and tracks price history for vehicle
//! listings scraped from a commercial marketplace. Listings are discovered through
//! paged search results, resolved against the local database, detail-scraped when
//! unknown, and periodically re-verified once they go stale.
//!
//! The core is a prioritized job queue drained by a fixed worker pool, backed by a
//! tiered fetch layer that degrades from plain HTTP requests to a full headless
//! browser as the origin's anti-scraping defenses escalate.

pub mod domain;
pub mod engine;
pub mod infrastructure;
