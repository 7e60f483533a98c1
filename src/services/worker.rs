//! Fixed-size worker pool draining the in-memory job queue.
//!
//! Every job runs under a hard timeout and a panic guard, so a slow or
//! crashing job only ever fails itself; the worker goes straight back to the
//! queue. A separate task sweeps old terminal jobs out of the job table.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc};
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use uuid::Uuid;

use crate::models::job::JobPayload;
use crate::models::window::WindowError;
use crate::services::fetch::{FetchError, Fetcher};
use crate::services::queue::JobQueue;
use crate::services::ranking::{RankingError, RankingService};
use crate::services::report::render_summary;
use crate::services::session::SessionManager;

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub workers: usize,
    pub job_timeout: Duration,
    /// How long terminal jobs are kept after their last update.
    pub retention: Duration,
    pub cleanup_interval: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: 40,
            job_timeout: Duration::from_secs(300),
            retention: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

/// Shared services a worker needs to execute any job type.
#[derive(Clone)]
pub struct JobContext {
    pub queue: Arc<JobQueue>,
    pub session: Arc<SessionManager>,
    pub fetcher: Arc<Fetcher>,
    pub ranking: Arc<RankingService>,
}

pub struct WorkerPool {
    ctx: JobContext,
    workers: Vec<JoinHandle<()>>,
    cleanup: JoinHandle<()>,
}

impl WorkerPool {
    /// Spawn `settings.workers` workers and the cleanup sweep.
    pub fn start(ctx: JobContext, settings: PoolSettings) -> Self {
        let workers = (0..settings.workers.max(1))
            .map(|worker_id| {
                let ctx = ctx.clone();
                tokio::spawn(worker_loop(worker_id, ctx, settings.job_timeout))
            })
            .collect::<Vec<_>>();

        let cleanup = tokio::spawn(cleanup_loop(
            ctx.queue.clone(),
            settings.cleanup_interval,
            settings.retention,
        ));

        tracing::info!(
            workers = workers.len(),
            job_timeout_secs = settings.job_timeout.as_secs(),
            "Worker pool started"
        );

        Self {
            ctx,
            workers,
            cleanup,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Cancel every worker and the sweep, wait for them to stop, then
    /// release the session and the fetcher.
    pub async fn shutdown(self) {
        tracing::info!(workers = self.workers.len(), "Shutting down worker pool");

        self.cleanup.abort();
        for handle in &self.workers {
            handle.abort();
        }
        for handle in self.workers {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Worker task ended abnormally");
                }
            }
        }
        let _ = self.cleanup.await;

        self.ctx.session.shutdown().await;
        self.ctx.fetcher.close();
        tracing::info!("Worker pool stopped");
    }
}

async fn worker_loop(worker_id: usize, ctx: JobContext, job_timeout: Duration) {
    tracing::debug!(worker_id, "Worker ready");
    while let Some(job_id) = ctx.queue.dequeue().await {
        process_job(worker_id, &ctx, job_id, job_timeout).await;
    }
    tracing::debug!(worker_id, "Job channel closed, worker exiting");
}

/// Claim, run and settle one job. Never panics and never returns an error:
/// every outcome is written to the job record.
async fn process_job(worker_id: usize, ctx: &JobContext, job_id: Uuid, job_timeout: Duration) {
    let job = match ctx.queue.claim(job_id).await {
        Ok(job) => job,
        Err(e) => {
            tracing::warn!(worker_id, job_id = %job_id, error = %e, "Could not claim job");
            return;
        }
    };
    let job_type = job.job_type();
    tracing::info!(worker_id, job_id = %job_id, job_type = %job_type, "Processing job");

    let started = Instant::now();
    let guarded = AssertUnwindSafe(execute(ctx, &job.payload)).catch_unwind();
    let outcome = match timeout(job_timeout, guarded).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(JobError::Panicked(panic_message(panic))),
        Err(_) => {
            metrics::counter!("jobs_timed_out_total").increment(1);
            Err(JobError::Timeout(job_timeout.as_secs()))
        }
    };

    let elapsed = started.elapsed();
    metrics::histogram!("job_processing_seconds", "job_type" => job_type.to_string())
        .record(elapsed.as_secs_f64());
    let elapsed_ms = elapsed.as_millis() as u64;

    let settled = match outcome {
        Ok(result) => {
            metrics::counter!("jobs_completed_total", "job_type" => job_type.to_string())
                .increment(1);
            tracing::info!(worker_id, job_id = %job_id, job_type = %job_type, elapsed_ms, "Job completed");
            ctx.queue.complete(job_id, result).await
        }
        Err(e) => {
            metrics::counter!("jobs_failed_total", "job_type" => job_type.to_string())
                .increment(1);
            tracing::error!(
                worker_id,
                job_id = %job_id,
                job_type = %job_type,
                elapsed_ms,
                error = %e,
                "Job failed"
            );
            ctx.queue.fail(job_id, e.to_string()).await
        }
    };

    if let Err(e) = settled {
        tracing::error!(worker_id, job_id = %job_id, error = %e, "Failed to record job outcome");
    }
}

/// Run a job payload to a JSON result.
pub async fn execute(ctx: &JobContext, payload: &JobPayload) -> Result<Value, JobError> {
    let current_year = Utc::now().year();

    match payload {
        JobPayload::FetchRanking(req) => {
            req.window.check(current_year)?;
            let window = req.window.resolve(current_year);
            let report = ctx.ranking.ranking(&req.location_id, &window).await?;
            Ok(serde_json::to_value(report.as_ref())?)
        }
        JobPayload::FetchImage(req) => {
            let species_code = req.species_code.trim();
            let image_url = ctx.ranking.species().image_url(species_code).await?;
            Ok(json!({
                "species_code": species_code,
                "image_url": image_url,
            }))
        }
        JobPayload::GenerateReport(req) => {
            req.window.check(current_year)?;
            let window = req.window.resolve(current_year);
            let report = ctx.ranking.ranking(&req.location_id, &window).await?;
            let document = render_summary(&report, req.top_n);
            Ok(serde_json::to_value(document)?)
        }
    }
}

/// Shortest sweep period; `interval_at` rejects a zero period.
const MIN_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

async fn cleanup_loop(queue: Arc<JobQueue>, period: Duration, retention: Duration) {
    let period = period.max(MIN_CLEANUP_INTERVAL);
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let removed = queue.cleanup_expired(Utc::now(), retention).await;
        metrics::counter!("jobs_cleaned_total").increment(removed as u64);
        if removed > 0 {
            tracing::info!(removed, "Cleaned up expired jobs");
        } else {
            tracing::debug!("No expired jobs to clean up");
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Ranking(#[from] RankingError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("job timed out after {0}s: the service is busy, please retry later")]
    Timeout(u64),

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("Failed to serialize job result: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::models::job::{ImageRequest, JobStatus};

    fn image_payload(code: &str) -> JobPayload {
        JobPayload::FetchImage(ImageRequest {
            species_code: code.to_string(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_sweep_runs_each_interval_and_keeps_live_jobs() {
        let queue = Arc::new(JobQueue::new());
        let queued = queue.enqueue(image_payload("a")).await;
        let processing = queue.enqueue(image_payload("b")).await;
        let completed = queue.enqueue(image_payload("c")).await;
        queue.claim(processing).await.unwrap();
        queue.claim(completed).await.unwrap();
        queue.complete(completed, Value::Null).await.unwrap();

        // zero is raised to the minimum period instead of panicking
        let sweep = tokio::spawn(cleanup_loop(queue.clone(), Duration::ZERO, Duration::ZERO));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(queue.get(completed).await.is_some());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!sweep.is_finished());
        assert!(queue.get(completed).await.is_none());
        assert_eq!(queue.get(queued).await.unwrap().status, JobStatus::Queued);
        assert_eq!(
            queue.get(processing).await.unwrap().status,
            JobStatus::Processing
        );

        sweep.abort();
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            JobError::Timeout(300).to_string(),
            "job timed out after 300s: the service is busy, please retry later"
        );
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic");
    }
}
