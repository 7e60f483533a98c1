use garde::Validate;
use serde::{Deserialize, Serialize};

/// Earliest year requested from eBird when no year range is given.
pub const DEFAULT_START_YEAR: i32 = 1900;

/// Requested time window for a ranking, as supplied by the caller.
///
/// Every bound is optional. Months are 1-12 and weeks are 1-4 within a month.
/// A sub-window whose start month is after its end month wraps across the
/// year boundary (e.g. Nov wk1 .. Feb wk4).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct TimeWindow {
    #[garde(skip)]
    #[serde(default)]
    pub start_year: Option<i32>,

    #[garde(skip)]
    #[serde(default)]
    pub end_year: Option<i32>,

    #[garde(range(min = 1, max = 12))]
    #[serde(default)]
    pub start_month: Option<u32>,

    #[garde(range(min = 1, max = 4))]
    #[serde(default)]
    pub start_week: Option<u32>,

    #[garde(range(min = 1, max = 12))]
    #[serde(default)]
    pub end_month: Option<u32>,

    #[garde(range(min = 1, max = 4))]
    #[serde(default)]
    pub end_week: Option<u32>,
}

/// A window with every bound filled in. This is what the rank calculator
/// consumes and what the result cache keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedWindow {
    pub start_year: i32,
    pub end_year: i32,
    pub start_month: u32,
    pub start_week: u32,
    pub end_month: u32,
    pub end_week: u32,
}

impl TimeWindow {
    /// Validate month/week ranges and the year invariant.
    ///
    /// Years must be given together, with `start_year <= end_year <= current_year`.
    pub fn check(&self, current_year: i32) -> Result<(), WindowError> {
        self.validate().map_err(|report| WindowError::Range(report.to_string()))?;

        match (self.start_year, self.end_year) {
            (None, None) => Ok(()),
            (Some(start), Some(end)) => {
                if end < start || end > current_year {
                    Err(WindowError::Years(format!(
                        "year range {start}-{end} must be ascending and end no later than {current_year}"
                    )))
                } else {
                    Ok(())
                }
            }
            _ => Err(WindowError::Years(
                "start_year and end_year must be given together".to_string(),
            )),
        }
    }

    /// Fill in defaults: full year range, Jan wk1 through Dec wk4.
    /// Out-of-range weeks are clamped into 1-4.
    pub fn resolve(&self, current_year: i32) -> ResolvedWindow {
        ResolvedWindow {
            start_year: self.start_year.unwrap_or(DEFAULT_START_YEAR),
            end_year: self.end_year.unwrap_or(current_year),
            start_month: self.start_month.unwrap_or(1),
            start_week: self.start_week.unwrap_or(1).clamp(1, 4),
            end_month: self.end_month.unwrap_or(12),
            end_week: self.end_week.unwrap_or(4).clamp(1, 4),
        }
    }
}

impl ResolvedWindow {
    /// Whether the (month, week) column belongs to this window.
    ///
    /// Month 0 means the column's month label was not recognized; such
    /// columns are never selected.
    pub fn includes(&self, month: u32, week: u32) -> bool {
        if month == 0 {
            return false;
        }

        let (sm, sw, em, ew) = (self.start_month, self.start_week, self.end_month, self.end_week);

        if sm < em {
            (sm < month && month < em) || (month == sm && week >= sw) || (month == em && week <= ew)
        } else if sm == em {
            month == sm && sw <= week && week <= ew
        } else {
            // wraps across the year boundary
            (month == sm && week >= sw)
                || (month == em && week <= ew)
                || month > sm
                || month < em
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("Invalid month/week bounds: {0}")]
    Range(String),

    #[error("Invalid year input: {0}")]
    Years(String),
}
