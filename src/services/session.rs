use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strum::Display;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::services::ebird::UpstreamError;

/// Operations on the single authenticated upstream session.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Cheap liveness check. `Err(UpstreamError::SessionInvalid)` means the
    /// upstream redirected to its login page.
    async fn probe(&self) -> Result<(), UpstreamError>;

    /// Log in again and persist the new session artifact.
    async fn authenticate(&self) -> Result<(), UpstreamError>;

    /// Release session resources on shutdown.
    async fn teardown(&self) -> Result<(), UpstreamError> {
        Ok(())
    }
}

/// Session state as seen from outside, for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    /// Never validated, or invalidated since.
    Unvalidated,
    Fresh,
    /// Validated once, but outside the freshness window.
    Stale,
}

/// Owns the upstream session and keeps it valid for all workers.
///
/// `ensure_valid` is safe to call from any number of workers at once. A
/// session validated within the freshness window is trusted without any
/// network call; otherwise one caller probes (and re-authenticates if needed)
/// while the others wait on the refresh lock and then see the fresh
/// timestamp.
pub struct SessionManager {
    backend: Arc<dyn SessionBackend>,
    freshness: Duration,
    last_validated: RwLock<Option<Instant>>,
    refresh_lock: Mutex<()>,
    refreshes: AtomicU64,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn SessionBackend>, freshness: Duration) -> Self {
        Self {
            backend,
            freshness,
            last_validated: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            refreshes: AtomicU64::new(0),
        }
    }

    async fn is_fresh(&self) -> bool {
        match *self.last_validated.read().await {
            Some(at) => at.elapsed() < self.freshness,
            None => false,
        }
    }

    pub async fn ensure_valid(&self) -> Result<(), UpstreamError> {
        if self.is_fresh().await {
            return Ok(());
        }

        let _guard = self.refresh_lock.lock().await;
        // another worker may have refreshed while we waited for the lock
        if self.is_fresh().await {
            tracing::debug!("Session refreshed by another worker");
            return Ok(());
        }

        match self.backend.probe().await {
            Ok(()) => {
                tracing::debug!("Existing eBird session is valid");
            }
            Err(e) => {
                if matches!(e, UpstreamError::SessionInvalid) {
                    tracing::info!("eBird session expired, re-authenticating");
                } else {
                    tracing::warn!(error = %e, "Session probe failed, re-authenticating");
                }

                self.refreshes.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("session_refresh_total").increment(1);

                if let Err(e) = self.backend.authenticate().await {
                    tracing::error!(error = %e, "eBird re-authentication failed");
                    return Err(e);
                }
            }
        }

        *self.last_validated.write().await = Some(Instant::now());
        Ok(())
    }

    /// Forget the last validation so the next `ensure_valid` probes again.
    pub async fn invalidate(&self) {
        *self.last_validated.write().await = None;
    }

    /// Time since the session was last known good.
    pub async fn age(&self) -> Option<Duration> {
        self.last_validated.read().await.map(|at| at.elapsed())
    }

    pub async fn status(&self) -> SessionStatus {
        match self.age().await {
            None => SessionStatus::Unvalidated,
            Some(age) if age < self.freshness => SessionStatus::Fresh,
            Some(_) => SessionStatus::Stale,
        }
    }

    /// Number of re-authentication attempts so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub async fn shutdown(&self) {
        let _guard = self.refresh_lock.lock().await;
        if let Err(e) = self.backend.teardown().await {
            tracing::warn!(error = %e, "Session teardown failed");
        }
        *self.last_validated.write().await = None;
    }
}
