use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::models::window::ResolvedWindow;

/// One species in a ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedSpecies {
    /// 1-based position after sorting by weighted frequency (descending).
    pub rank: usize,
    pub species: String,
    pub weighted_frequency: f64,
    /// Weighted frequency as a percentage of the rank-1 species.
    pub percentile_of_top: f64,
}

/// Per-week sample sizes keyed by `"<month>_w<n>"`, in grid order.
///
/// Serialized as a JSON object whose key order follows the barchart columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklySampleSizes(Vec<(String, f64)>);

impl WeeklySampleSizes {
    /// Record a week's sample size. A repeated key overwrites the earlier value.
    pub fn insert(&mut self, key: String, sample_size: f64) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = sample_size,
            None => self.0.push((key, sample_size)),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn total(&self) -> f64 {
        self.0.iter().map(|(_, v)| v).sum()
    }
}

impl Serialize for WeeklySampleSizes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Output of the rank calculator for one dataset and window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingOutcome {
    /// Sum of sample sizes over the selected weeks.
    pub total_sample_size: f64,
    /// Every week in the dataset, selected or not.
    pub sample_sizes_by_week: WeeklySampleSizes,
    /// Only the weeks that fed the ranking.
    pub sample_sizes_used: WeeklySampleSizes,
    pub weeks_used: usize,
    pub ranked_species: Vec<RankedSpecies>,
}

/// A ranked species with cross-referenced eBird identifiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeciesEntry {
    #[serde(flatten)]
    pub ranked: RankedSpecies,
    pub species_code: Option<String>,
    pub species_url: Option<String>,
    pub image_url: Option<String>,
}

/// Result of a FETCH_RANKING job, also what the result cache stores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingReport {
    pub location_id: String,
    pub window: ResolvedWindow,
    pub total_sample_size: f64,
    pub sample_sizes_by_week: WeeklySampleSizes,
    pub sample_sizes_used: WeeklySampleSizes,
    pub weeks_used: usize,
    pub species: Vec<SpeciesEntry>,
}
