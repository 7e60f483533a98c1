use std::sync::Arc;

use crate::models::ranking::RankingReport;
use crate::models::window::ResolvedWindow;
use crate::services::cache::{CacheSettings, TtlCache};
use crate::services::ebird::UpstreamError;
use crate::services::fetch::{FetchError, Fetcher};
use crate::services::rank_calculator::{self, RankError};
use crate::services::session::SessionManager;
use crate::services::species::SpeciesDirectory;

type ReportKey = (String, ResolvedWindow);
type DatasetKey = (String, i32, i32);

/// Session -> fetch -> rank -> enrich, behind two TTL caches.
///
/// Finished reports are cached per (location, resolved window). Raw barchart
/// text is cached per (location, year range), so a different month/week
/// window over the same years is recomputed without another download.
pub struct RankingService {
    session: Arc<SessionManager>,
    fetcher: Arc<Fetcher>,
    species: Arc<SpeciesDirectory>,
    reports: TtlCache<ReportKey, Arc<RankingReport>>,
    datasets: TtlCache<DatasetKey, Arc<String>>,
}

impl RankingService {
    pub fn new(
        session: Arc<SessionManager>,
        fetcher: Arc<Fetcher>,
        species: Arc<SpeciesDirectory>,
        cache: CacheSettings,
    ) -> Self {
        Self {
            session,
            fetcher,
            species,
            reports: TtlCache::new(cache),
            datasets: TtlCache::new(cache),
        }
    }

    pub fn species(&self) -> &Arc<SpeciesDirectory> {
        &self.species
    }

    /// Ranked species for a location over a resolved window.
    pub async fn ranking(
        &self,
        location_id: &str,
        window: &ResolvedWindow,
    ) -> Result<Arc<RankingReport>, RankingError> {
        let location_id = normalize_location(location_id);
        let key = (location_id.clone(), *window);

        if let Some(report) = self.reports.get(&key).await {
            metrics::counter!("ranking_cache_hits_total").increment(1);
            tracing::debug!(location_id = %location_id, "Ranking served from cache");
            return Ok(report);
        }
        metrics::counter!("ranking_cache_misses_total").increment(1);

        let raw = self.barchart(&location_id, window).await?;
        let outcome = rank_calculator::compute(&raw, window)?;
        tracing::info!(
            location_id = %location_id,
            species = outcome.ranked_species.len(),
            weeks_used = outcome.weeks_used,
            total_sample_size = outcome.total_sample_size,
            "Computed species ranking"
        );

        let species = self.species.enrich(outcome.ranked_species).await;
        let report = Arc::new(RankingReport {
            location_id,
            window: *window,
            total_sample_size: outcome.total_sample_size,
            sample_sizes_by_week: outcome.sample_sizes_by_week,
            sample_sizes_used: outcome.sample_sizes_used,
            weeks_used: outcome.weeks_used,
            species,
        });

        self.reports.put(key, report.clone()).await;
        Ok(report)
    }

    async fn barchart(
        &self,
        location_id: &str,
        window: &ResolvedWindow,
    ) -> Result<Arc<String>, RankingError> {
        let key = (location_id.to_string(), window.start_year, window.end_year);
        if let Some(raw) = self.datasets.get(&key).await {
            tracing::debug!(location_id, "Barchart data served from cache");
            return Ok(raw);
        }

        self.session.ensure_valid().await.map_err(RankingError::Session)?;

        let raw = match self
            .fetcher
            .barchart(location_id, window.start_year, window.end_year)
            .await
        {
            Ok(raw) => Arc::new(raw),
            Err(e) => {
                if matches!(e.upstream(), Some(UpstreamError::Blocked)) {
                    // the freshness timestamp can no longer be trusted
                    self.session.invalidate().await;
                }
                return Err(RankingError::Fetch(e));
            }
        };

        self.datasets.put(key, raw.clone()).await;
        Ok(raw)
    }
}

/// Hotspot ids are case-insensitive upstream; cache keys use upper case.
pub fn normalize_location(location_id: &str) -> String {
    location_id.trim().to_uppercase()
}

#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    #[error("eBird session unavailable: {0}")]
    Session(#[source] UpstreamError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Rank(#[from] RankError),
}
