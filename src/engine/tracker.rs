//! Run progress accounting
//!
//! The queue reports job creation, workers report starts and completions, and
//! a background task renders a periodic summary. The tracker is advisory only;
//! nothing in the pipeline depends on its numbers, and the render loop skips a
//! tick rather than wait on a contended lock.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use super::job::JobKind;
use super::queue::JobQueue;

/// Completed-duration samples kept per job type for the moving average.
const DURATION_WINDOW: usize = 50;

#[derive(Default)]
struct JobStats {
    created: u64,
    started: u64,
    completed: u64,
    recent: VecDeque<Duration>,
}

impl JobStats {
    fn avg(&self) -> Option<Duration> {
        if self.recent.is_empty() {
            return None;
        }
        let total: Duration = self.recent.iter().sum();
        Some(total / self.recent.len() as u32)
    }
}

/// Point-in-time view of one job type's counters.
#[derive(Debug, Clone, PartialEq)]
pub struct KindSnapshot {
    pub kind: JobKind,
    pub created: u64,
    pub started: u64,
    pub completed: u64,
    pub busy: u64,
    pub avg: Option<Duration>,
    /// Projected time to finish the known remaining jobs of this type.
    pub eta: Option<Duration>,
}

pub struct ProgressTracker {
    started_at: Instant,
    stats: Mutex<BTreeMap<JobKind, JobStats>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            stats: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn record_created(&self, kind: JobKind) {
        self.stats.lock().entry(kind).or_default().created += 1;
    }

    pub fn record_start(&self, kind: JobKind) {
        self.stats.lock().entry(kind).or_default().started += 1;
    }

    pub fn record_complete(&self, kind: JobKind, elapsed: Duration) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(kind).or_default();
        entry.completed += 1;
        if entry.recent.len() >= DURATION_WINDOW {
            entry.recent.pop_front();
        }
        entry.recent.push_back(elapsed);
    }

    pub fn snapshot(&self) -> Vec<KindSnapshot> {
        Self::snapshots_from(&self.stats.lock())
    }

    fn snapshots_from(stats: &BTreeMap<JobKind, JobStats>) -> Vec<KindSnapshot> {
        stats
            .iter()
            .map(|(kind, s)| {
                let avg = s.avg();
                let remaining = s.created.saturating_sub(s.completed);
                KindSnapshot {
                    kind: *kind,
                    created: s.created,
                    started: s.started,
                    completed: s.completed,
                    busy: s.started.saturating_sub(s.completed),
                    avg,
                    eta: avg.map(|a| a * remaining as u32),
                }
            })
            .collect()
    }

    pub fn completed_total(&self) -> u64 {
        self.stats.lock().values().map(|s| s.completed).sum()
    }

    /// Lossy render: skips the tick when the stats lock is contended.
    fn render(&self, queue: &JobQueue) {
        let Some(stats) = self.stats.try_lock() else {
            return;
        };
        let snapshots = Self::snapshots_from(&stats);
        drop(stats);

        let lines: Vec<String> = snapshots
            .iter()
            .map(|s| {
                let avg_ms = s.avg.map(|d| d.as_millis()).unwrap_or(0);
                let eta_s = s.eta.map(|d| d.as_secs()).unwrap_or(0);
                format!(
                    "{}={}/{} busy={} avg={}ms eta={}s",
                    s.kind, s.completed, s.created, s.busy, avg_ms, eta_s
                )
            })
            .collect();
        info!(
            elapsed_s = self.started_at.elapsed().as_secs(),
            queued = queue.len(),
            outstanding = queue.outstanding(),
            "progress: {}",
            lines.join(" ")
        );
    }

    /// Periodic progress render until the handle is aborted.
    pub fn spawn_render_loop(
        self: &Arc<Self>,
        queue: Arc<JobQueue>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracker.render(&queue);
            }
        })
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_started_minus_completed() {
        let t = ProgressTracker::new();
        t.record_created(JobKind::PageLoad);
        t.record_created(JobKind::PageLoad);
        t.record_start(JobKind::PageLoad);
        t.record_start(JobKind::PageLoad);
        t.record_complete(JobKind::PageLoad, Duration::from_millis(120));

        let snap = t.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].created, 2);
        assert_eq!(snap[0].started, 2);
        assert_eq!(snap[0].completed, 1);
        assert_eq!(snap[0].busy, 1);
        assert_eq!(snap[0].avg, Some(Duration::from_millis(120)));
    }

    #[test]
    fn eta_projects_remaining_created_jobs() {
        let t = ProgressTracker::new();
        for _ in 0..4 {
            t.record_created(JobKind::DetailScrape);
        }
        t.record_start(JobKind::DetailScrape);
        t.record_complete(JobKind::DetailScrape, Duration::from_secs(2));

        // One done at 2s average, three remain.
        let snap = t.snapshot();
        assert_eq!(snap[0].eta, Some(Duration::from_secs(6)));
    }

    #[test]
    fn duration_window_is_bounded() {
        let t = ProgressTracker::new();
        for i in 0..(DURATION_WINDOW + 20) {
            t.record_start(JobKind::Save);
            t.record_complete(JobKind::Save, Duration::from_millis(i as u64));
        }
        let stats = t.stats.lock();
        assert_eq!(stats[&JobKind::Save].recent.len(), DURATION_WINDOW);
    }

    #[test]
    fn kinds_tracked_independently() {
        let t = ProgressTracker::new();
        t.record_start(JobKind::PageLoad);
        t.record_start(JobKind::Save);
        t.record_complete(JobKind::Save, Duration::from_millis(5));

        assert_eq!(t.completed_total(), 1);
        assert_eq!(t.snapshot().len(), 2);
    }
}
