//! Infrastructure: configuration, logging, fetch, parsing, and persistence

pub mod config;
pub mod fetch;
pub mod identity;
pub mod logging;
pub mod parsing;
pub mod repository;

pub use config::AppConfig;
pub use fetch::{Fetch, FetchError, FetchOutcome, FetchTier, TieredFetcher};
pub use identity::IdentityStore;
pub use parsing::ListingExtractor;
pub use repository::{ListingRepository, ListingSnapshot};
