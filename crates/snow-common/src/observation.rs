//! Weekly observation records stored per pixel.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Sentinel values stored in place of a sensor reading.
pub mod codes {
    use chrono::{Duration, NaiveDate};

    /// No granule, date older than the retry cutoff. Permanent.
    pub const OLD_MISSING: i32 = 301;
    /// No granule yet, date within the retry cutoff. Retried by gap detection.
    pub const RECENT_MISSING: i32 = 400;
    /// Granule obtained but the pixel could not be extracted. Permanent.
    pub const OTHER: i32 = 401;

    /// All sentinel codes.
    pub const ALL: [i32; 3] = [OLD_MISSING, RECENT_MISSING, OTHER];

    /// Days before "now" after which a missing granule is considered gone for good.
    pub const RETRY_CUTOFF_DAYS: i64 = 30;

    pub fn is_error(value: i32) -> bool {
        ALL.contains(&value)
    }

    pub fn is_retryable(value: i32) -> bool {
        value == RECENT_MISSING
    }

    /// Code recorded when no granule exists for `date`, judged at `today`.
    pub fn for_unavailable(date: NaiveDate, today: NaiveDate) -> i32 {
        if date < today - Duration::days(RETRY_CUTOFF_DAYS) {
            OLD_MISSING
        } else {
            RECENT_MISSING
        }
    }
}

/// Number of week slots in a yearly record.
pub const WEEKS_PER_YEAR: usize = 53;

/// One week cell: raw value (or sentinel code) and cloud persistence.
///
/// Serialized as a two-element array `[value, cloud_persistence]`, with
/// `null` for a cell that was never populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeekObservation(pub Option<i32>, pub u32);

impl WeekObservation {
    pub const EMPTY: Self = Self(None, 0);

    pub fn new(value: i32, cloud_persistence: u32) -> Self {
        Self(Some(value), cloud_persistence)
    }

    pub fn value(&self) -> Option<i32> {
        self.0
    }

    pub fn cloud_persistence(&self) -> u32 {
        self.1
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.0.is_some_and(codes::is_error)
    }

    /// True when gap detection should (re)fetch this cell.
    pub fn needs_fetch(&self) -> bool {
        match self.0 {
            None => true,
            Some(value) => codes::is_retryable(value),
        }
    }
}

/// One calendar year of weekly observations for a pixel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRecord {
    pub year: i32,
    pub data: Vec<WeekObservation>,
}

impl YearRecord {
    /// A year with all 53 slots empty.
    pub fn empty(year: i32) -> Self {
        Self {
            year,
            data: vec![WeekObservation::EMPTY; WEEKS_PER_YEAR],
        }
    }

    /// Cell at `week`, if the slot exists.
    pub fn week(&self, week: usize) -> Option<&WeekObservation> {
        self.data.get(week)
    }

    /// Write a cell, padding the array with empty slots as needed.
    pub fn set_week(&mut self, week: usize, observation: WeekObservation) {
        if self.data.len() <= week {
            self.data.resize(week + 1, WeekObservation::EMPTY);
        }
        self.data[week] = observation;
    }

    /// Anchor date of a slot of this year.
    pub fn week_date(&self, week: usize) -> Option<NaiveDate> {
        let jan1 = NaiveDate::from_ymd_opt(self.year, 1, 1)?;
        jan1.checked_add_signed(Duration::days(7 * week as i64))
    }
}
