use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::services::ebird::UpstreamError;

/// Raw requests against the upstream site. Callers must have validated the
/// session beforehand.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Barchart TSV for a location and inclusive year range.
    async fn barchart(
        &self,
        location_id: &str,
        start_year: i32,
        end_year: i32,
    ) -> Result<String, UpstreamError>;

    /// HTML of a species page.
    async fn species_page(&self, species_code: &str) -> Result<String, UpstreamError>;
}

#[derive(Debug, Clone, Copy)]
pub struct FetchSettings {
    /// Concurrent in-flight upstream requests.
    pub concurrency: usize,
    /// Attempts per fetch, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub base_backoff: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_attempts: 3,
            base_backoff: Duration::from_secs(2),
        }
    }
}

/// Upper bound on a single retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Delay before attempt `attempt + 1`: `base * 2^(attempt - 1)`, capped at
/// `MAX_BACKOFF`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
}

/// Rate-limited, retrying access to the upstream source.
///
/// At most `concurrency` requests are in flight across all workers. The
/// permit is released while backing off so other workers can use it.
pub struct Fetcher {
    source: Arc<dyn UpstreamSource>,
    permits: Semaphore,
    settings: FetchSettings,
}

impl Fetcher {
    pub fn new(source: Arc<dyn UpstreamSource>, settings: FetchSettings) -> Self {
        Self {
            source,
            permits: Semaphore::new(settings.concurrency.max(1)),
            settings,
        }
    }

    /// Fetch raw barchart TSV for `location_id` over `start_year..=end_year`.
    pub async fn barchart(
        &self,
        location_id: &str,
        start_year: i32,
        end_year: i32,
    ) -> Result<String, FetchError> {
        tracing::info!(location_id, start_year, end_year, "Fetching barchart data");
        self.with_retry("barchart", || {
            self.source.barchart(location_id, start_year, end_year)
        })
        .await
    }

    /// Fetch a species page's HTML.
    pub async fn species_page(&self, species_code: &str) -> Result<String, FetchError> {
        self.with_retry("species_page", || self.source.species_page(species_code))
            .await
    }

    async fn with_retry<F, Fut>(&self, operation: &str, mut call: F) -> Result<String, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, UpstreamError>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = {
                let _permit = self.permits.acquire().await.map_err(|_| FetchError::Closed)?;
                call().await
            };

            match outcome {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = backoff_delay(self.settings.base_backoff, attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Upstream request failed, backing off"
                    );
                    metrics::counter!("upstream_fetch_retries_total").increment(1);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(operation, attempt, error = %e, "Upstream request failed");
                    return Err(FetchError::Exhausted {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    /// Stop handing out permits; pending and future fetches fail with `Closed`.
    pub fn close(&self) {
        self.permits.close();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("eBird request failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: UpstreamError,
    },

    #[error("Fetcher is shut down")]
    Closed,
}

impl FetchError {
    /// The final upstream error, if any.
    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            FetchError::Exhausted { source, .. } => Some(source),
            FetchError::Closed => None,
        }
    }
}
