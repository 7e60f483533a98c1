use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Datelike, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{Job, JobPayload, JobStatus, SubmitJobResponse};

/// POST /api/v1/jobs: enqueue a job and return its id immediately.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(payload): Json<JobPayload>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    validate_payload(&payload, Utc::now().year())?;

    let job_id = state.queue.enqueue(payload).await;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            status: JobStatus::Queued,
        }),
    ))
}

/// GET /api/v1/jobs/{job_id}: current state of a job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    state
        .queue
        .get(job_id)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound(job_id))
}

fn validate_payload(payload: &JobPayload, current_year: i32) -> Result<(), ApiError> {
    let target = match payload {
        JobPayload::FetchRanking(req) => &req.location_id,
        JobPayload::GenerateReport(req) => &req.location_id,
        JobPayload::FetchImage(req) => &req.species_code,
    };
    if target.trim().is_empty() {
        return Err(ApiError::Invalid(format!(
            "{} requires a non-empty identifier",
            payload.job_type()
        )));
    }

    if let Some(window) = payload.window() {
        window
            .check(current_year)
            .map_err(|e| ApiError::Invalid(e.to_string()))?;
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("{0}")]
    Invalid(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{ImageRequest, RankingRequest};
    use crate::models::window::TimeWindow;

    fn ranking(location_id: &str, window: TimeWindow) -> JobPayload {
        JobPayload::FetchRanking(RankingRequest {
            location_id: location_id.to_string(),
            window,
        })
    }

    #[test]
    fn test_accepts_default_window() {
        assert!(validate_payload(&ranking("L901084", TimeWindow::default()), 2025).is_ok());
    }

    #[test]
    fn test_rejects_bad_window() {
        let window = TimeWindow {
            start_month: Some(13),
            ..Default::default()
        };
        assert!(matches!(
            validate_payload(&ranking("L1", window), 2025),
            Err(ApiError::Invalid(_))
        ));

        let window = TimeWindow {
            start_year: Some(2020),
            ..Default::default()
        };
        assert!(validate_payload(&ranking("L1", window), 2025).is_err());
    }

    #[test]
    fn test_rejects_blank_identifier() {
        assert!(validate_payload(&ranking("  ", TimeWindow::default()), 2025).is_err());
        let image = JobPayload::FetchImage(ImageRequest {
            species_code: String::new(),
        });
        assert!(validate_payload(&image, 2025).is_err());
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::NotFound(Uuid::nil()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Invalid("bad".to_string()).into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
