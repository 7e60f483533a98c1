use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::window::TimeWindow;

/// Status of a job in the in-memory queue.
///
/// Transitions only move forward: queued -> processing -> completed | failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    FetchRanking,
    FetchImage,
    GenerateReport,
}

fn default_top_n() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingRequest {
    pub location_id: String,
    #[serde(default)]
    pub window: TimeWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub species_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub location_id: String,
    #[serde(default)]
    pub window: TimeWindow,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

/// Typed job payload, tagged by job type on the wire:
/// `{"type": "FETCH_RANKING", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPayload {
    FetchRanking(RankingRequest),
    FetchImage(ImageRequest),
    GenerateReport(ReportRequest),
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::FetchRanking(_) => JobType::FetchRanking,
            JobPayload::FetchImage(_) => JobType::FetchImage,
            JobPayload::GenerateReport(_) => JobType::GenerateReport,
        }
    }

    /// The time window carried by the payload, if the job type has one.
    pub fn window(&self) -> Option<&TimeWindow> {
        match self {
            JobPayload::FetchRanking(req) => Some(&req.window),
            JobPayload::GenerateReport(req) => Some(&req.window),
            JobPayload::FetchImage(_) => None,
        }
    }
}

/// A unit of asynchronous work tracked by the job queue.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    #[serde(flatten)]
    pub payload: JobPayload,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(payload: JobPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payload,
            status: JobStatus::Queued,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }
}

/// Response after submitting a job.
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}
