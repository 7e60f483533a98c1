use std::fmt::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

use crate::models::ranking::RankingReport;
use crate::models::window::ResolvedWindow;
use crate::services::rank_calculator::MONTH_NAMES;

/// A generated document ready to be stored as a JSON job result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportDocument {
    pub filename: String,
    pub content_type: String,
    /// Base64 of the document bytes.
    pub data: String,
}

impl ReportDocument {
    pub fn text(filename: String, body: &str) -> Self {
        Self {
            filename,
            content_type: "text/plain".to_string(),
            data: STANDARD.encode(body.as_bytes()),
        }
    }
}

/// Render the top `top_n` species of a ranking as a plain-text summary.
pub fn render_summary(report: &RankingReport, top_n: usize) -> ReportDocument {
    let window = &report.window;
    let mut out = String::new();

    // writing to a String cannot fail
    let _ = writeln!(out, "Hotspot species report: {}", report.location_id);
    let _ = writeln!(out, "Years: {}-{}", window.start_year, window.end_year);
    let _ = writeln!(out, "Window: {}", describe_window(window));
    let _ = writeln!(out, "Total sample size: {}", report.total_sample_size);
    let _ = writeln!(out, "Weeks used: {}", report.weeks_used);
    let _ = writeln!(out);

    let _ = writeln!(out, "{:>4}  {:<40} {:>10} {:>8}", "Rank", "Species", "Frequency", "% top");
    for entry in report.species.iter().take(top_n) {
        let ranked = &entry.ranked;
        let _ = writeln!(
            out,
            "{:>4}  {:<40} {:>10.4} {:>8.1}",
            ranked.rank, ranked.species, ranked.weighted_frequency, ranked.percentile_of_top
        );
    }
    if report.species.is_empty() {
        let _ = writeln!(out, "(no species recorded)");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Sample sizes (weeks used):");
    for (week, sample_size) in report.sample_sizes_used.iter() {
        let _ = writeln!(out, "  {week:<8} {sample_size}");
    }

    let filename = format!(
        "hotspot_{}_{}-{}.txt",
        report.location_id, window.start_year, window.end_year
    );
    ReportDocument::text(filename, &out)
}

fn describe_window(window: &ResolvedWindow) -> String {
    let month = |m: u32| {
        MONTH_NAMES
            .get(m.saturating_sub(1) as usize)
            .copied()
            .unwrap_or("?")
    };
    format!(
        "{} week {} to {} week {}",
        month(window.start_month),
        window.start_week,
        month(window.end_month),
        window.end_week
    )
}
