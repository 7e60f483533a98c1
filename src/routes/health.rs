use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub workers: usize,
    pub queue_depth: usize,
    pub session: SessionHealth,
}

#[derive(Serialize)]
pub struct SessionHealth {
    /// "unvalidated", "fresh", or "stale" once the freshness window has passed.
    pub status: String,
    pub age_secs: Option<u64>,
    pub refreshes: u64,
}

/// GET /health: liveness plus queue and session status.
///
/// An unvalidated session is not an error: the first job logs in lazily.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let age = state.session.age().await;
    let session_status = state.session.status().await;

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            workers: state.worker_count,
            queue_depth: state.queue.queue_depth(),
            session: SessionHealth {
                status: session_status.to_string(),
                age_secs: age.map(|a| a.as_secs()),
                refreshes: state.session.refresh_count(),
            },
        },
    };

    (StatusCode::OK, Json(response))
}
