//! Prioritized multi-producer/multi-consumer job queue
//!
//! Jobs are ordered by (static priority, monotonic sequence number); the
//! sequence number is generated under the same lock as the insert, so equal
//! priorities dequeue in exact submission order regardless of producer
//! interleaving. Depth is unbounded - backpressure comes from the fixed worker
//! pool, not the queue.
//!
//! A token semaphore mirrors queue contents one permit per item, which makes
//! `take` a plain awaitable acquire with no lost-wakeup hazard. A separate
//! outstanding-work counter tracks one unit per submitted job until a worker
//! reports it finished; `wait_idle` resolves when that counter reaches zero.
//! Queue emptiness alone is only a hint, since running jobs keep refilling it.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use super::job::Job;
use super::tracker::ProgressTracker;
use crate::infrastructure::config::PriorityTable;

struct Entry {
    priority: u8,
    seq: u64,
    job: Job,
}

// BinaryHeap is a max-heap; invert so the lowest (priority, seq) pops first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

struct QueueInner {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

/// Shared prioritized job queue.
pub struct JobQueue {
    priorities: PriorityTable,
    inner: Mutex<QueueInner>,
    /// One permit per queued item.
    tokens: Semaphore,
    /// Jobs submitted but not yet reported finished.
    outstanding: AtomicUsize,
    idle: Notify,
    tracker: Option<Arc<ProgressTracker>>,
}

impl JobQueue {
    pub fn new(priorities: PriorityTable) -> Self {
        Self {
            priorities,
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            tokens: Semaphore::new(0),
            outstanding: AtomicUsize::new(0),
            idle: Notify::new(),
            tracker: None,
        }
    }

    /// Queue that reports each submission to the progress tracker.
    pub fn with_tracker(priorities: PriorityTable, tracker: Arc<ProgressTracker>) -> Self {
        Self {
            tracker: Some(tracker),
            ..Self::new(priorities)
        }
    }

    /// Enqueue a job at its configured priority.
    pub fn submit(&self, job: Job) {
        if let Some(tracker) = &self.tracker {
            tracker.record_created(job.kind());
        }
        let priority = self.priorities.priority_of(job.kind());
        {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Entry { priority, seq, job });
        }
        self.outstanding.fetch_add(1, AtomicOrdering::SeqCst);
        self.tokens.add_permits(1);
    }

    /// Take the lowest (priority, sequence) job, waiting until one exists.
    pub async fn take(&self) -> Job {
        let permit = self
            .tokens
            .acquire()
            .await
            .expect("job queue semaphore closed");
        permit.forget();
        let mut inner = self.inner.lock();
        inner
            .heap
            .pop()
            .expect("token permit held without a queued job")
            .job
    }

    /// Report one taken job as finished, successfully or not.
    pub fn task_done(&self) {
        let previous = self.outstanding.fetch_sub(1, AtomicOrdering::SeqCst);
        debug_assert!(previous > 0, "task_done without matching submit");
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Jobs submitted but not yet finished. This includes jobs currently
    /// executing, so it only reaches zero once the pipeline has fully drained.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(AtomicOrdering::SeqCst)
    }

    /// Queued (not yet taken) job count. Diagnostic only.
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve once outstanding work reaches zero.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn queue() -> JobQueue {
        JobQueue::new(PriorityTable::default())
    }

    #[tokio::test]
    async fn lower_priority_value_dequeues_first() {
        let q = queue();
        q.submit(Job::FlushBuffer { batch: None });
        q.submit(Job::Verifier);
        q.submit(Job::PageLoad {
            page: 1,
            pair: crate::domain::ModelQuery {
                make: "honda".into(),
                model: "honda-cr_v_hybrid".into(),
            },
        });

        assert!(matches!(q.take().await, Job::PageLoad { .. }));
        assert!(matches!(q.take().await, Job::Verifier));
        assert!(matches!(q.take().await, Job::FlushBuffer { .. }));
    }

    #[tokio::test]
    async fn equal_priority_preserves_submission_order() {
        let q = queue();
        for vin in ["V1", "V2", "V3", "V4"] {
            q.submit(Job::VerifyDetail {
                vin: vin.to_string(),
                url: String::new(),
            });
        }
        for expected in ["V1", "V2", "V3", "V4"] {
            match q.take().await {
                Job::VerifyDetail { vin, .. } => assert_eq!(vin, expected),
                other => panic!("unexpected job {:?}", other.kind()),
            }
        }
    }

    #[tokio::test]
    async fn take_blocks_until_submit() {
        let q = Arc::new(queue());
        let taker = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.take().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!taker.is_finished());

        q.submit(Job::Verifier);
        assert!(matches!(taker.await.unwrap(), Job::Verifier));
    }

    #[tokio::test]
    async fn wait_idle_resolves_only_after_all_work_finishes() {
        let q = Arc::new(queue());
        q.submit(Job::Verifier);
        q.submit(Job::Verifier);

        let idle = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.wait_idle().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!idle.is_finished());

        q.take().await;
        q.task_done();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!idle.is_finished());

        q.take().await;
        q.task_done();
        idle.await.unwrap();
        assert_eq!(q.outstanding(), 0);
    }

    #[tokio::test]
    async fn concurrent_producers_keep_fifo_within_priority() {
        let q = Arc::new(queue());
        let mut handles = Vec::new();
        for producer in 0..4u32 {
            let q = Arc::clone(&q);
            handles.push(tokio::spawn(async move {
                for i in 0..25u32 {
                    q.submit(Job::VerifyDetail {
                        vin: format!("{producer}-{i}"),
                        url: String::new(),
                    });
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Per-producer order must be preserved even though producers raced.
        let mut last_seen = std::collections::HashMap::new();
        for _ in 0..100 {
            if let Job::VerifyDetail { vin, .. } = q.take().await {
                let (producer, i) = vin.split_once('-').unwrap();
                let i: u32 = i.parse().unwrap();
                if let Some(prev) = last_seen.insert(producer.to_string(), i) {
                    assert!(i > prev, "producer {producer} out of order");
                }
            }
        }
    }
}
