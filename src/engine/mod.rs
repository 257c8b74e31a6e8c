//! Scheduler core: prioritized job queue, worker pool, dispatcher, and the
//! run orchestration that ties them together.

pub mod context;
pub mod dispatcher;
pub mod job;
pub mod queue;
pub mod runner;
pub mod tracker;
pub mod worker;

pub use context::{CardBuffer, ListingBuffer, ScrapeContext};
pub use dispatcher::Dispatcher;
pub use job::{Job, JobKind};
pub use queue::JobQueue;
pub use runner::{RunSummary, ScrapeEngine};
pub use tracker::ProgressTracker;
