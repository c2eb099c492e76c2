use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::Rng;
use snafu::ensure;

use crate::error::{ConfigurationSnafu, Result};

/// A half-open `[start, end)` range of dates that due dates and adjustment
/// dates are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        ensure!(
            start < end,
            ConfigurationSnafu {
                message: format!("date window start {start} must be before end {end}"),
            }
        );

        Ok(Self {
            start: start.and_time(Default::default()),
            end: end.and_time(Default::default()),
        })
    }

    pub fn start(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn end(&self) -> NaiveDate {
        self.end.date()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start() <= date && date < self.end()
    }

    /// Draws a uniformly random second in the window and returns its date.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> NaiveDate {
        let span = (self.end - self.start).num_seconds();
        let offset = rng.random_range(0..span);
        (self.start + Duration::seconds(offset)).date()
    }
}

impl Default for DateWindow {
    /// 2025-01-01 up to, excluding, 2026-12-31.
    fn default() -> Self {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default();
        let end = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap_or_default();
        Self {
            start: start.and_time(Default::default()),
            end: end.and_time(Default::default()),
        }
    }
}
