//! Calendar-month run window.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

/// A `YYYY-MM` month. Papers published in `[start, end)` (UTC) belong to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && (1..=9999).contains(&year) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// The month before the one containing `today`.
    pub fn previous_of(today: NaiveDate) -> Self {
        if today.month() == 1 {
            Self { year: today.year() - 1, month: 12 }
        } else {
            Self { year: today.year(), month: today.month() - 1 }
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    fn first_instant(self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Half-open `[start, end)` bounds in UTC.
    pub fn bounds(self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.first_instant(), self.next().first_instant())
    }

    pub fn contains(self, ts: &DateTime<Utc>) -> bool {
        let (start, end) = self.bounds();
        start <= *ts && *ts < end
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid month '{0}', expected YYYY-MM")]
pub struct InvalidMonth(String);

impl FromStr for Month {
    type Err = InvalidMonth;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || InvalidMonth(s.to_string());
        let (y, m) = s.trim().split_once('-').ok_or_else(bad)?;
        if y.len() != 4 || m.len() != 2 {
            return Err(bad());
        }
        let year = y.parse::<i32>().map_err(|_| bad())?;
        let month = m.parse::<u32>().map_err(|_| bad())?;
        Month::new(year, month).ok_or_else(bad)
    }
}
