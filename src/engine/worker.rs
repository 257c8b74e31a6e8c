//! Worker pool
//!
//! Each worker is one tokio task looping take/execute/task_done. A `Stop` job
//! terminates exactly one worker, so shutdown submits one per worker after the
//! pipeline drains. Job errors are logged and swallowed; the job still counts
//! as finished so `wait_idle` cannot hang on a failure.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::context::ScrapeContext;
use super::job::Job;
use super::queue::JobQueue;

pub fn spawn_workers(
    count: usize,
    ctx: Arc<ScrapeContext>,
    queue: Arc<JobQueue>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            let ctx = Arc::clone(&ctx);
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { worker_loop(id, ctx, queue).await })
        })
        .collect()
}

async fn worker_loop(id: usize, ctx: Arc<ScrapeContext>, queue: Arc<JobQueue>) {
    debug!(worker = id, "worker started");
    loop {
        let job = queue.take().await;
        if matches!(job, Job::Stop) {
            queue.task_done();
            break;
        }

        let kind = job.kind();
        ctx.tracker.record_start(kind);
        let started = Instant::now();
        if let Err(e) = job.execute(&ctx, &queue).await {
            warn!(worker = id, job = %kind, "job failed: {e:#}");
        }
        ctx.tracker.record_complete(kind, started.elapsed());
        queue.task_done();
    }
    debug!(worker = id, "worker stopped");
}
