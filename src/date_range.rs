//! Date range calculation and navigation
//!
//! Turns a view mode and an anchor date into a concrete calendar interval.
//! Weeks start on Monday for every metric. No range ever ends after today:
//! the current period is cut at today and stepping forward past today lands
//! on the period containing today.

use crate::models::{DateRange, Direction, ViewMode};
use chrono::{DateTime, Datelike, Local, NaiveDate};
use tracing::debug;

/// Accepted textual anchor formats, tried in order
const ANCHOR_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// Range calculator with an optionally pinned "today"
#[derive(Debug, Clone, Copy, Default)]
pub struct DateRangeCalculator {
    today: Option<NaiveDate>,
}

impl DateRangeCalculator {
    /// Calculator that reads today from the local clock
    pub fn new() -> Self {
        DateRangeCalculator { today: None }
    }

    /// Calculator with a fixed today, for reproducible ranges
    pub fn with_today(today: NaiveDate) -> Self {
        DateRangeCalculator { today: Some(today) }
    }

    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Parse an anchor date, falling back to today on anything unparseable
    pub fn resolve_anchor(&self, input: &str) -> NaiveDate {
        let trimmed = input.trim();

        for format in ANCHOR_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
                return date;
            }
        }

        if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
            return instant.date_naive();
        }

        debug!(anchor = %input, "Unparseable anchor date, using today");
        self.today()
    }

    /// Range of the given view mode containing `anchor`
    pub fn compute_range(&self, view_mode: ViewMode, anchor: NaiveDate) -> DateRange {
        let today = self.today();
        let anchor = anchor.min(today);

        let start = match view_mode {
            ViewMode::Day => anchor,
            ViewMode::Week => week_start(anchor),
            ViewMode::Month => month_start(anchor),
        };

        let nominal = DateRange {
            start,
            end: start,
            view_mode,
        };
        let end = nominal.period_end().min(today);

        DateRange {
            start,
            end,
            view_mode,
        }
    }

    /// Step one period back or forward
    ///
    /// `Next` never produces a range beyond today; it is clamped to the range
    /// containing today instead of being rejected.
    pub fn navigate(&self, current: &DateRange, direction: Direction) -> DateRange {
        let anchor = match direction {
            Direction::Prev => current.start.pred_opt().unwrap_or(current.start),
            Direction::Next => current
                .period_end()
                .succ_opt()
                .unwrap_or(current.period_end()),
        };

        let range = self.compute_range(current.view_mode, anchor);
        debug!(
            ?direction,
            from = %current.start,
            to = %range.start,
            "Navigated date range"
        );
        range
    }

    /// Range of the given view mode containing today
    pub fn reset_to_today(&self, view_mode: ViewMode) -> DateRange {
        self.compute_range(view_mode, self.today())
    }

    /// Range immediately preceding `current`, used as the trend reference
    pub fn previous_period(&self, current: &DateRange) -> DateRange {
        self.navigate(current, Direction::Prev)
    }
}

/// Monday of the week containing `date`
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = date.weekday().num_days_from_monday() as u64;
    date.checked_sub_days(chrono::Days::new(offset))
        .unwrap_or(date)
}

/// First day of the month containing `date`
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Key used to look up server pre-aggregated statistics for a range
///
/// Day: `2026-10-15`, Week: ISO week `2026-W42`, Month: `2026-10`.
pub fn dimension_key(range: &DateRange) -> String {
    match range.view_mode {
        ViewMode::Day => range.start.format("%Y-%m-%d").to_string(),
        ViewMode::Week => {
            let week = range.start.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
        ViewMode::Month => range.start.format("%Y-%m").to_string(),
    }
}
