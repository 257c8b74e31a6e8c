//! Discovery-phase completion tracking
//!
//! The dispatcher owns the unresolved-card buffer and the countdown of result
//! pages still in flight. When the last page reports in, it flushes whatever
//! cards remain below the batch threshold and then starts the verification
//! phase - in that order, so every discovered listing is resolved before stale
//! rows are judged.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::context::CardBuffer;
use super::job::Job;
use super::queue::JobQueue;
use crate::domain::ListingCard;

pub struct Dispatcher {
    unresolved: CardBuffer,
    remaining_pages: Mutex<u32>,
}

impl Dispatcher {
    pub fn new(total_pages: u32, unresolved_batch_size: usize) -> Self {
        Self {
            unresolved: CardBuffer::new(unresolved_batch_size),
            remaining_pages: Mutex::new(total_pages),
        }
    }

    /// Buffer one card; a full buffer becomes a resolution job.
    pub fn add_unresolved(&self, queue: &Arc<JobQueue>, card: ListingCard) {
        if let Some(batch) = self.unresolved.push(card) {
            queue.submit(Job::ListingResolution { batch });
        }
    }

    /// Count one results page as done. The call that brings the countdown to
    /// zero flushes the partial card buffer and enqueues the single verifier;
    /// later calls are no-ops.
    pub fn notify_page_complete(&self, queue: &Arc<JobQueue>) {
        let mut remaining = self.remaining_pages.lock();
        if *remaining == 0 {
            return;
        }
        *remaining -= 1;
        if *remaining > 0 {
            return;
        }

        let tail = self.unresolved.drain();
        if !tail.is_empty() {
            queue.submit(Job::ListingResolution { batch: tail });
        }
        info!("discovery complete, starting verification");
        queue.submit(Job::Verifier);
    }

    pub fn pages_remaining(&self) -> u32 {
        *self.remaining_pages.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::JobKind;
    use crate::infrastructure::config::PriorityTable;

    fn card(id: &str) -> ListingCard {
        ListingCard {
            listing_id: id.to_string(),
            url: format!("https://example.com/{id}/"),
            title: None,
            price: None,
            msrp: None,
            dealer: None,
            location: None,
            distance: None,
            image_url: None,
        }
    }

    #[tokio::test]
    async fn last_page_flushes_tail_then_verifier() {
        let queue = Arc::new(JobQueue::new(PriorityTable::default()));
        let dispatcher = Dispatcher::new(2, 10);

        dispatcher.add_unresolved(&queue, card("a"));
        dispatcher.notify_page_complete(&queue);
        assert!(queue.is_empty());

        dispatcher.add_unresolved(&queue, card("b"));
        dispatcher.notify_page_complete(&queue);

        // Tail batch first, then the verifier.
        match queue.take().await {
            Job::ListingResolution { batch } => assert_eq!(batch.len(), 2),
            other => panic!("unexpected job {:?}", other.kind()),
        }
        assert!(matches!(queue.take().await, Job::Verifier));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn racing_page_completions_emit_exactly_one_verifier() {
        let queue = Arc::new(JobQueue::new(PriorityTable::default()));
        let dispatcher = Arc::new(Dispatcher::new(16, 10));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let queue = Arc::clone(&queue);
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                dispatcher.notify_page_complete(&queue);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut verifiers = 0;
        while !queue.is_empty() {
            if queue.take().await.kind() == JobKind::Verifier {
                verifiers += 1;
            }
        }
        assert_eq!(verifiers, 1);
        assert_eq!(dispatcher.pages_remaining(), 0);
    }

    #[tokio::test]
    async fn empty_tail_skips_resolution_job() {
        let queue = Arc::new(JobQueue::new(PriorityTable::default()));
        let dispatcher = Dispatcher::new(1, 10);
        dispatcher.notify_page_complete(&queue);

        assert!(matches!(queue.take().await, Job::Verifier));
        assert!(queue.is_empty());
    }
}
