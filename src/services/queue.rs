use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::models::job::{Job, JobPayload, JobStatus};

/// In-process job table plus a FIFO of job ids waiting for a worker.
///
/// Jobs live only in memory. Status writes go through `claim`, `complete`
/// and `fail`, which enforce the forward-only lifecycle; cleanup only ever
/// removes terminal jobs.
pub struct JobQueue {
    jobs: RwLock<HashMap<Uuid, Job>>,
    sender: mpsc::UnboundedSender<Uuid>,
    receiver: Mutex<mpsc::UnboundedReceiver<Uuid>>,
    depth: AtomicUsize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            jobs: RwLock::new(HashMap::new()),
            sender,
            receiver: Mutex::new(receiver),
            depth: AtomicUsize::new(0),
        }
    }

    /// Record a queued job and push its id onto the FIFO.
    pub async fn enqueue(&self, payload: JobPayload) -> Uuid {
        let job = Job::new(payload);
        let id = job.id;
        let job_type = job.job_type();

        self.jobs.write().await.insert(id, job);
        // counted before the send so a worker's decrement never precedes it
        let depth = self.depth.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        // the receiver lives as long as `self`, so the channel cannot be closed
        if self.sender.send(id).is_err() {
            tracing::error!(job_id = %id, "Job channel closed, job will never run");
        }

        metrics::counter!("jobs_enqueued_total", "job_type" => job_type.to_string()).increment(1);
        metrics::gauge!("job_queue_depth").set(depth as f64);
        tracing::info!(job_id = %id, job_type = %job_type, "Job enqueued");

        id
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Wait for the next queued job id.
    ///
    /// Cancel-safe: a worker aborted while waiting does not lose an id.
    pub async fn dequeue(&self) -> Option<Uuid> {
        let id = self.receiver.lock().await.recv().await?;
        let previous = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| Some(d.saturating_sub(1)))
            .unwrap_or_else(|d| d);
        let depth = previous.saturating_sub(1);
        metrics::gauge!("job_queue_depth").set(depth as f64);
        Some(id)
    }

    /// Move a queued job to processing and return a snapshot of it.
    pub async fn claim(&self, id: Uuid) -> Result<Job, QueueError> {
        self.transition(id, JobStatus::Processing, |_| {}).await
    }

    pub async fn complete(&self, id: Uuid, result: Value) -> Result<Job, QueueError> {
        self.transition(id, JobStatus::Completed, |job| job.result = Some(result))
            .await
    }

    pub async fn fail(&self, id: Uuid, error: String) -> Result<Job, QueueError> {
        self.transition(id, JobStatus::Failed, |job| job.error = Some(error))
            .await
    }

    async fn transition(
        &self,
        id: Uuid,
        next: JobStatus,
        apply: impl FnOnce(&mut Job),
    ) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;

        if !job.status.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                id,
                from: job.status,
                to: next,
            });
        }

        apply(job);
        job.status = next;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    /// Delete terminal jobs whose last update is at least `retention` before
    /// `now`. Returns how many were removed.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let retention = TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX);
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && now - job.updated_at >= retention));
        before - jobs.len()
    }

    /// Jobs enqueued but not yet picked up by a worker.
    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Jobs currently tracked, in any status.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
}
