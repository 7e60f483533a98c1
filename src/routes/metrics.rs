use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus metrics scrape endpoint.
/// Returns job, session, fetch and cache metrics in text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the service records.
pub fn describe_metrics() {
    metrics::describe_counter!("jobs_enqueued_total", "Total jobs submitted, by job type");
    metrics::describe_counter!("jobs_completed_total", "Total jobs completed, by job type");
    metrics::describe_counter!("jobs_failed_total", "Total jobs that failed, by job type");
    metrics::describe_counter!("jobs_timed_out_total", "Jobs abandoned after the per-job timeout");
    metrics::describe_histogram!("job_processing_seconds", "Time to run a job end to end");
    metrics::describe_gauge!("job_queue_depth", "Jobs waiting for a free worker");
    metrics::describe_counter!("session_refresh_total", "eBird re-authentication attempts");
    metrics::describe_counter!("upstream_fetch_retries_total", "Retried eBird requests");
    metrics::describe_counter!("ranking_cache_hits_total", "Rankings served from the result cache");
    metrics::describe_counter!("ranking_cache_misses_total", "Rankings that had to be computed");
    metrics::describe_counter!("jobs_cleaned_total", "Terminal jobs removed by the cleanup sweep");
}
