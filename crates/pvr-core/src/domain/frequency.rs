//! Repeat frequency and the 7-day mask (Monday first) stored on repeat jobs.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

/// Seven booleans, index 0 = Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayMask([bool; 7]);

impl DayMask {
    pub const EMPTY: DayMask = DayMask([false; 7]);
    pub const DAILY: DayMask = DayMask([true; 7]);
    pub const WEEKDAYS: DayMask = DayMask([true, true, true, true, true, false, false]);
    pub const WEEKENDS: DayMask = DayMask([false, false, false, false, false, true, true]);

    pub fn new(days: [bool; 7]) -> Self {
        Self(days)
    }

    pub fn single(day: Weekday) -> Self {
        let mut days = [false; 7];
        days[day.num_days_from_monday() as usize] = true;
        Self(days)
    }

    pub fn days(&self) -> [bool; 7] {
        self.0
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0[day.num_days_from_monday() as usize]
    }

    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|d| *d)
    }
}

/// How often a time-based recording repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Once,
    Daily,
    Weekly,
    Weekdays,
    Weekends,
    Custom(DayMask),
}

impl Frequency {
    /// Day mask for this frequency.
    ///
    /// WEEKLY takes its single active day from `occurrence`, or from `today`
    /// when no occurrence date is known. ONCE has no mask.
    pub fn day_mask(self, occurrence: Option<NaiveDate>, today: NaiveDate) -> DayMask {
        match self {
            Frequency::Once => DayMask::EMPTY,
            Frequency::Daily => DayMask::DAILY,
            Frequency::Weekdays => DayMask::WEEKDAYS,
            Frequency::Weekends => DayMask::WEEKENDS,
            Frequency::Weekly => DayMask::single(occurrence.unwrap_or(today).weekday()),
            Frequency::Custom(mask) => mask,
        }
    }
}

/// Returns the mask only when at least one day is set.
///
/// A repeat request whose mask fails this check is submitted as a single job.
pub fn check_repeat_days_array(mask: DayMask) -> Option<DayMask> {
    if mask.is_empty() { None } else { Some(mask) }
}
