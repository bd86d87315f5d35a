//! Week-of-year arithmetic and processing date windows.
//!
//! Weeks are anchored on January 1st of each year, not on a weekday: week `k`
//! of year `Y` starts on `Jan 1 + 7k`. A year therefore has 53 slots, the last
//! one covering Dec 30/31.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{SnowError, SnowResult};

/// First year with VIIRS snow cover products.
pub const FIRST_DATA_YEAR: i32 = 2012;

/// Week slot of a date within its own calendar year (0-52).
pub fn week_index(date: NaiveDate) -> usize {
    (date.ordinal0() / 7) as usize
}

/// Anchor date of a week slot, or `None` if the slot is past the year's end.
pub fn week_date(year: i32, index: usize) -> Option<NaiveDate> {
    let jan1 = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let date = jan1.checked_add_signed(Duration::days(7 * index as i64))?;
    (date.year() == year).then_some(date)
}

/// Inclusive date range a run is reconciled over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> SnowResult<Self> {
        if start > end {
            return Err(SnowError::InvalidDateWindow {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Window from Jan 1 of `from_year` to Dec 31 of `to_year`, or to `today`
    /// when `to_year` is the current year.
    ///
    /// Missing bounds default to [`FIRST_DATA_YEAR`] and the current year.
    pub fn from_years(
        from_year: Option<i32>,
        to_year: Option<i32>,
        today: NaiveDate,
    ) -> SnowResult<Self> {
        let current_year = today.year();
        let from_year = from_year.unwrap_or(FIRST_DATA_YEAR);
        let to_year = to_year.unwrap_or(current_year);

        if from_year < FIRST_DATA_YEAR {
            return Err(SnowError::InvalidYearRange(format!(
                "data is only available from {} onwards",
                FIRST_DATA_YEAR
            )));
        }
        if to_year > current_year {
            return Err(SnowError::InvalidYearRange(format!(
                "cannot process future years beyond {}",
                current_year
            )));
        }
        if from_year > to_year {
            return Err(SnowError::InvalidYearRange(format!(
                "from-year {} is greater than to-year {}",
                from_year, to_year
            )));
        }

        let start = year_start(from_year)?;
        let end = if to_year == current_year {
            today
        } else {
            NaiveDate::from_ymd_opt(to_year, 12, 31)
                .ok_or_else(|| SnowError::InvalidYearRange(to_year.to_string()))?
        };

        Self::new(start, end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Calendar years touched by the window, inclusive.
    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.start.year()..=self.end.year()
    }
}

fn year_start(year: i32) -> SnowResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(|| SnowError::InvalidYearRange(year.to_string()))
}
