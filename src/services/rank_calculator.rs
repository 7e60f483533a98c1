//! Weighted relative frequency ranking over eBird barchart data.
//!
//! The barchart TSV has a fixed layout: row 13 carries sparse month labels
//! (a blank cell continues the previous month), row 14 carries the per-week
//! sample sizes, and species rows start at row 16. Column 0 is the species
//! name; the remaining columns are positionally aligned across all rows.

use crate::models::ranking::{RankedSpecies, RankingOutcome, WeeklySampleSizes};
use crate::models::window::ResolvedWindow;

pub const MONTH_ROW_INDEX: usize = 13;
pub const SAMPLE_SIZE_ROW_INDEX: usize = 14;
pub const DATA_START_ROW_INDEX: usize = 16;

pub const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Map a three-letter month label to 1-12, or 0 when unrecognized.
pub fn month_number(label: &str) -> u32 {
    let label = label.trim();
    MONTH_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(label))
        .map(|idx| idx as u32 + 1)
        .unwrap_or(0)
}

/// A single species row.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesRow {
    pub name: String,
    pub frequencies: Vec<f64>,
}

/// Resolved position of a data column in the weekly grid.
#[derive(Debug, Clone, PartialEq)]
pub struct WeekColumn {
    pub label: String,
    /// 1-12, or 0 when the label is not a month.
    pub month: u32,
    /// Week within the month, restarting at 1 on each new label.
    pub week: u32,
}

impl WeekColumn {
    pub fn key(&self) -> String {
        format!("{}_w{}", self.label, self.week)
    }
}

/// Parsed barchart matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct BarchartDataset {
    pub columns: Vec<WeekColumn>,
    pub sample_sizes: Vec<f64>,
    pub species: Vec<SpeciesRow>,
}

fn split_row(line: &str) -> Vec<&str> {
    line.trim_end_matches(['\r', '\n']).split('\t').collect()
}

/// Non-numeric, non-finite and negative cells all count as 0.
fn parse_number(cell: &str) -> f64 {
    cell.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map_or(0.0, |v| v.max(0.0))
}

impl BarchartDataset {
    pub fn parse(raw: &str) -> Result<Self, RankError> {
        let lines: Vec<&str> = raw.lines().collect();
        if lines.len() <= SAMPLE_SIZE_ROW_INDEX {
            return Err(RankError::MalformedDataset(format!(
                "expected at least {} rows, found {}",
                SAMPLE_SIZE_ROW_INDEX + 1,
                lines.len()
            )));
        }

        let month_row = split_row(lines[MONTH_ROW_INDEX]);
        let sample_row = split_row(lines[SAMPLE_SIZE_ROW_INDEX]);

        let mut sample_cells: Vec<&str> = sample_row.iter().skip(1).copied().collect();
        while sample_cells.last().is_some_and(|c| c.trim().is_empty()) {
            sample_cells.pop();
        }
        let sample_sizes: Vec<f64> = sample_cells.iter().map(|c| parse_number(c)).collect();

        let species: Vec<SpeciesRow> = lines
            .iter()
            .skip(DATA_START_ROW_INDEX)
            .filter_map(|line| {
                let cells = split_row(line);
                let name = cells.first()?.trim();
                if name.is_empty() {
                    return None;
                }
                Some(SpeciesRow {
                    name: name.to_string(),
                    frequencies: cells.iter().skip(1).map(|c| parse_number(c)).collect(),
                })
            })
            .collect();

        if month_row.iter().skip(1).all(|c| c.trim().is_empty()) {
            return Err(RankError::MalformedDataset(
                "month label row is empty".to_string(),
            ));
        }

        let column_count = sample_sizes.len();
        let columns = resolve_columns(&month_row, column_count);

        Ok(Self {
            columns,
            sample_sizes,
            species,
        })
    }
}

/// Carry month labels forward across blank cells and number the weeks.
///
/// `month_row` includes the leading species-header cell. Columns past the
/// end of the label row repeat the last month and week unchanged.
pub fn resolve_columns(month_row: &[&str], column_count: usize) -> Vec<WeekColumn> {
    let mut columns = Vec::with_capacity(column_count);
    let mut label = String::new();
    let mut month = 0;
    let mut week = 0;

    for idx in 0..column_count {
        match month_row.get(idx + 1).map(|c| c.trim()) {
            Some("") => week += 1,
            Some(cell) => {
                label = cell.to_string();
                month = month_number(cell);
                week = 1;
            }
            None => {}
        }
        columns.push(WeekColumn {
            label: label.clone(),
            month,
            week,
        });
    }

    columns
}

/// Rank species in `raw` over the weeks selected by `window`.
pub fn compute(raw: &str, window: &ResolvedWindow) -> Result<RankingOutcome, RankError> {
    let dataset = BarchartDataset::parse(raw)?;
    Ok(rank_dataset(&dataset, window))
}

/// Weighting and ranking over an already parsed dataset.
pub fn rank_dataset(dataset: &BarchartDataset, window: &ResolvedWindow) -> RankingOutcome {
    let mut sample_sizes_by_week = WeeklySampleSizes::default();
    let mut sample_sizes_used = WeeklySampleSizes::default();
    let mut selected = Vec::new();

    for (idx, column) in dataset.columns.iter().enumerate() {
        let weight = dataset.sample_sizes.get(idx).copied().unwrap_or(0.0);
        sample_sizes_by_week.insert(column.key(), weight);

        if window.includes(column.month, column.week) {
            sample_sizes_used.insert(column.key(), weight);
            selected.push((idx, weight));
        }
    }

    let total_sample_size: f64 = selected.iter().map(|(_, w)| w).sum();

    let mut weighted: Vec<(String, f64)> = dataset
        .species
        .iter()
        .map(|row| {
            let frequency = if total_sample_size > 0.0 {
                let weighted_sum: f64 = selected
                    .iter()
                    .map(|&(idx, w)| row.frequencies.get(idx).copied().unwrap_or(0.0) * w)
                    .sum();
                weighted_sum / total_sample_size
            } else {
                0.0
            };
            (row.name.clone(), frequency)
        })
        .collect();

    // stable: equal frequencies keep input order
    weighted.sort_by(|a, b| b.1.total_cmp(&a.1));

    let top = weighted.first().map(|(_, f)| *f).unwrap_or(0.0);
    let ranked_species = weighted
        .into_iter()
        .enumerate()
        .map(|(idx, (species, weighted_frequency))| RankedSpecies {
            rank: idx + 1,
            species,
            weighted_frequency,
            percentile_of_top: if top > 0.0 {
                weighted_frequency / top * 100.0
            } else {
                0.0
            },
        })
        .collect();

    RankingOutcome {
        total_sample_size,
        sample_sizes_by_week,
        weeks_used: selected.len(),
        sample_sizes_used,
        ranked_species,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("Malformed barchart dataset: {0}")]
    MalformedDataset(String),
}
