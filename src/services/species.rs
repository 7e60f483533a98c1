use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::models::ranking::{RankedSpecies, SpeciesEntry};
use crate::services::ebird::parse_species_image;
use crate::services::fetch::{FetchError, Fetcher};
use crate::services::taxonomy::Taxonomy;

/// Species whose images are fetched during enrichment; the rest only get a
/// previously cached image.
const IMAGE_FETCH_LIMIT: usize = 3;

/// Cross-references ranked species with taxonomy codes, species pages and
/// representative images.
pub struct SpeciesDirectory {
    taxonomy: Taxonomy,
    base_url: String,
    fetcher: Arc<Fetcher>,
    codes: RwLock<HashMap<String, Option<String>>>,
    images: RwLock<HashMap<String, String>>,
}

impl SpeciesDirectory {
    pub fn new(taxonomy: Taxonomy, base_url: &str, fetcher: Arc<Fetcher>) -> Self {
        Self {
            taxonomy,
            base_url: base_url.trim_end_matches('/').to_string(),
            fetcher,
            codes: RwLock::new(HashMap::new()),
            images: RwLock::new(HashMap::new()),
        }
    }

    /// Species code for a common name. Misses are memoised too.
    pub async fn resolve_code(&self, common_name: &str) -> Option<String> {
        if let Some(code) = self.codes.read().await.get(common_name) {
            return code.clone();
        }

        let code = self
            .taxonomy
            .resolve(common_name)
            .map(|entry| entry.code.clone());
        if code.is_none() {
            tracing::debug!(species = common_name, "No taxonomy match");
        }
        self.codes
            .write()
            .await
            .insert(common_name.to_string(), code.clone());
        code
    }

    pub fn species_url(&self, code: &str) -> String {
        format!("{}/species/{}", self.base_url, code)
    }

    pub async fn cached_image(&self, code: &str) -> Option<String> {
        self.images.read().await.get(code).cloned()
    }

    /// Image URL from the species page, fetched through the shared fetcher.
    /// Found URLs are memoised per code.
    pub async fn image_url(&self, code: &str) -> Result<Option<String>, FetchError> {
        if let Some(url) = self.cached_image(code).await {
            return Ok(Some(url));
        }

        let html = self.fetcher.species_page(code).await?;
        let image = parse_species_image(&html);
        match &image {
            Some(url) => {
                self.images
                    .write()
                    .await
                    .insert(code.to_string(), url.clone());
            }
            None => tracing::debug!(species_code = code, "No image on species page"),
        }
        Ok(image)
    }

    /// Attach codes, URLs and images to a ranked list. Lookup failures leave
    /// the fields empty and never fail the ranking.
    pub async fn enrich(&self, ranked: Vec<RankedSpecies>) -> Vec<SpeciesEntry> {
        let mut entries = Vec::with_capacity(ranked.len());

        for (idx, species) in ranked.into_iter().enumerate() {
            let species_code = self.resolve_code(&species.species).await;
            let species_url = species_code.as_deref().map(|code| self.species_url(code));

            let image_url = match species_code.as_deref() {
                Some(code) if idx < IMAGE_FETCH_LIMIT => match self.image_url(code).await {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::warn!(species_code = code, error = %e, "Image lookup failed");
                        None
                    }
                },
                Some(code) => self.cached_image(code).await,
                None => None,
            };

            entries.push(SpeciesEntry {
                ranked: species,
                species_code,
                species_url,
                image_url,
            });
        }

        entries
    }
}
