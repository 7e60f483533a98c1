//! In-memory eBird doubles and barchart data for pipeline tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hotspot_rank::services::ebird::UpstreamError;
use hotspot_rank::services::fetch::UpstreamSource;
use hotspot_rank::services::session::SessionBackend;
use hotspot_rank::services::taxonomy::{TaxonEntry, Taxonomy};

/// Barchart fetches for this location hang past any job timeout.
pub const SLOW_LOCATION: &str = "L_SLOW";
/// Barchart fetches for this location panic inside the job.
pub const PANIC_LOCATION: &str = "L_PANIC";
/// Barchart fetches for this location always return an HTML page.
pub const BLOCKED_LOCATION: &str = "L_BLOCKED";

pub const SPECIES: &[(&str, &str)] = &[
    ("American Robin", "amerob"),
    ("Song Sparrow", "sonspa"),
    ("Blue Jay", "blujay"),
    ("Mallard", "mallar3"),
];

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Build barchart TSV in the eBird layout: 13 preamble rows, the month row,
/// the sample-size row, a blank row, then one row per species over 48 weeks.
pub fn barchart_tsv(
    species: &[&str],
    sample_size: impl Fn(usize) -> f64,
    freq: impl Fn(usize, usize) -> f64,
) -> String {
    let mut lines: Vec<String> = (0..13).map(|i| format!("preamble {i}")).collect();

    let mut month_row = vec![String::new()];
    for month in MONTHS {
        month_row.push(month.to_string());
        month_row.extend(std::iter::repeat(String::new()).take(3));
    }
    lines.push(month_row.join("\t"));

    let mut sample_row = vec!["Sample Size:".to_string()];
    sample_row.extend((0..48).map(|c| sample_size(c).to_string()));
    lines.push(sample_row.join("\t"));
    lines.push(String::new());

    for (s, name) in species.iter().enumerate() {
        let mut row = vec![name.to_string()];
        row.extend((0..48).map(|c| freq(s, c).to_string()));
        lines.push(row.join("\t"));
    }
    lines.join("\n")
}

/// Default dataset: sample size `week + 1`, species frequencies that rank
/// in taxonomy order.
pub fn default_barchart() -> String {
    let names: Vec<&str> = SPECIES.iter().map(|(name, _)| *name).collect();
    barchart_tsv(&names, |c| (c + 1) as f64, |s, _| 0.8 / (s + 1) as f64)
}

pub fn taxonomy() -> Taxonomy {
    Taxonomy::from_entries(
        SPECIES
            .iter()
            .map(|(name, code)| TaxonEntry {
                common_name: name.to_string(),
                code: code.to_string(),
            })
            .collect(),
    )
}

/// Stands in for eBird: always logged in after one authentication, serves
/// `default_barchart` and species pages with a lead image.
#[derive(Default)]
pub struct FakeEbird {
    pub probes: AtomicUsize,
    pub logins: AtomicUsize,
    pub barchart_calls: AtomicUsize,
    pub species_pages: AtomicUsize,
}

impl FakeEbird {
    pub fn barchart_calls(&self) -> usize {
        self.barchart_calls.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionBackend for FakeEbird {
    async fn probe(&self) -> Result<(), UpstreamError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.logins.load(Ordering::SeqCst) == 0 {
            Err(UpstreamError::SessionInvalid)
        } else {
            Ok(())
        }
    }

    async fn authenticate(&self) -> Result<(), UpstreamError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl UpstreamSource for FakeEbird {
    async fn barchart(
        &self,
        location_id: &str,
        _start_year: i32,
        _end_year: i32,
    ) -> Result<String, UpstreamError> {
        self.barchart_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;

        match location_id {
            SLOW_LOCATION => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(default_barchart())
            }
            PANIC_LOCATION => panic!("barchart parser exploded"),
            BLOCKED_LOCATION => Err(UpstreamError::Blocked),
            _ => Ok(default_barchart()),
        }
    }

    async fn species_page(&self, species_code: &str) -> Result<String, UpstreamError> {
        self.species_pages.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            r#"<html><head><meta property="og:image" content="https://cdn.example/{species_code}.jpg"></head><body></body></html>"#
        ))
    }
}
