//! Test helper utilities: wire the full pipeline against `FakeEbird`

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hotspot_rank::app_state::AppState;
use hotspot_rank::models::job::{Job, JobPayload, RankingRequest, ReportRequest};
use hotspot_rank::models::window::TimeWindow;
use hotspot_rank::services::{
    cache::CacheSettings,
    fetch::{FetchSettings, Fetcher},
    queue::JobQueue,
    ranking::RankingService,
    session::SessionManager,
    species::SpeciesDirectory,
    worker::{JobContext, PoolSettings, WorkerPool},
};
use tokio::time::sleep;
use uuid::Uuid;

use crate::fixtures::{taxonomy, FakeEbird};

pub struct TestPipeline {
    pub upstream: Arc<FakeEbird>,
    pub queue: Arc<JobQueue>,
    pub session: Arc<SessionManager>,
    pub pool: WorkerPool,
}

impl TestPipeline {
    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.queue.clone(),
            self.session.clone(),
            self.pool.worker_count(),
        )
    }
}

pub fn pool_settings(workers: usize) -> PoolSettings {
    PoolSettings {
        workers,
        ..PoolSettings::default()
    }
}

/// Queue, pool, session, fetcher, caches and enrichment, all on one fake
/// upstream.
pub fn start_pipeline(settings: PoolSettings) -> TestPipeline {
    let upstream = Arc::new(FakeEbird::default());
    let session = Arc::new(SessionManager::new(
        upstream.clone(),
        Duration::from_secs(300),
    ));
    let fetcher = Arc::new(Fetcher::new(upstream.clone(), FetchSettings::default()));
    let species = Arc::new(SpeciesDirectory::new(
        taxonomy(),
        "https://ebird.org",
        fetcher.clone(),
    ));
    let ranking = Arc::new(RankingService::new(
        session.clone(),
        fetcher.clone(),
        species,
        CacheSettings::default(),
    ));
    let queue = Arc::new(JobQueue::new());

    let pool = WorkerPool::start(
        JobContext {
            queue: queue.clone(),
            session: session.clone(),
            fetcher,
            ranking,
        },
        settings,
    );

    TestPipeline {
        upstream,
        queue,
        session,
        pool,
    }
}

pub fn ranking_job(location_id: &str, window: TimeWindow) -> JobPayload {
    JobPayload::FetchRanking(RankingRequest {
        location_id: location_id.to_string(),
        window,
    })
}

pub fn report_job(location_id: &str, top_n: usize) -> JobPayload {
    JobPayload::GenerateReport(ReportRequest {
        location_id: location_id.to_string(),
        window: TimeWindow::default(),
        top_n,
    })
}

/// Poll until the job reaches a terminal status.
pub async fn wait_for_terminal(queue: &JobQueue, job_id: Uuid) -> Job {
    // generous: covers a full job timeout on the paused test clock
    for _ in 0..10_000 {
        if let Some(job) = queue.get(job_id).await {
            if job.status.is_terminal() {
                return job;
            }
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("job {job_id} did not finish");
}
