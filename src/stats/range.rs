//! Relative time windows such as `7d`, `1M` or `last 3 months`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Longest window accepted, in days.
const MAX_WINDOW_DAYS: i64 = 3650;

#[derive(Error, Debug, PartialEq)]
pub enum RangeError {
    #[error("unrecognized time range {0:?}, expected e.g. 1d, 7d, 1M, 3M, 6M, 1Y or \"last 7 days\"")]
    Unrecognized(String),
    #[error("time range must be at least one unit")]
    Empty,
    #[error("time range longer than {} days", MAX_WINDOW_DAYS)]
    TooLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowUnit {
    Hour,
    Day,
    Week,
    /// Fixed 30 days.
    Month,
    /// Fixed 365 days.
    Year,
}

impl WindowUnit {
    fn hours(self) -> i64 {
        match self {
            WindowUnit::Hour => 1,
            WindowUnit::Day => 24,
            WindowUnit::Week => 24 * 7,
            WindowUnit::Month => 24 * 30,
            WindowUnit::Year => 24 * 365,
        }
    }

    fn short(self) -> char {
        match self {
            WindowUnit::Hour => 'h',
            WindowUnit::Day => 'd',
            WindowUnit::Week => 'w',
            WindowUnit::Month => 'M',
            WindowUnit::Year => 'Y',
        }
    }
}

/// A window ending "now", resolved against the wall clock each time it is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeWindow {
    pub amount: u32,
    pub unit: WindowUnit,
}

/// A concrete half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RelativeWindow {
    pub fn new(amount: u32, unit: WindowUnit) -> Result<Self, RangeError> {
        if amount == 0 {
            return Err(RangeError::Empty);
        }
        if i64::from(amount) * unit.hours() > MAX_WINDOW_DAYS * 24 {
            return Err(RangeError::TooLong);
        }
        Ok(Self { amount, unit })
    }

    pub fn days(amount: u32) -> Result<Self, RangeError> {
        Self::new(amount, WindowUnit::Day)
    }

    pub fn duration(&self) -> ChronoDuration {
        ChronoDuration::hours(i64::from(self.amount) * self.unit.hours())
    }

    pub fn resolve(&self, now: DateTime<Utc>) -> TimeRange {
        // End is exclusive; nudge it so a result stamped exactly `now` is included.
        TimeRange {
            start: now - self.duration(),
            end: now + ChronoDuration::nanoseconds(1),
        }
    }
}

impl Default for RelativeWindow {
    fn default() -> Self {
        Self {
            amount: 7,
            unit: WindowUnit::Day,
        }
    }
}

impl fmt::Display for RelativeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.short())
    }
}

fn short_form() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\s*([hdwMY])$").expect("valid short-form regex"))
}

fn long_form() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:last\s+)?(\d+)\s+(hour|day|week|month|year)s?$")
            .expect("valid long-form regex")
    })
}

impl FromStr for RelativeWindow {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let unrecognized = || RangeError::Unrecognized(s.to_string());

        if let Some(caps) = short_form().captures(s) {
            let amount = caps[1].parse().map_err(|_| RangeError::TooLong)?;
            let unit = match &caps[2] {
                "h" => WindowUnit::Hour,
                "d" => WindowUnit::Day,
                "w" => WindowUnit::Week,
                "M" => WindowUnit::Month,
                "Y" => WindowUnit::Year,
                _ => return Err(unrecognized()),
            };
            return Self::new(amount, unit);
        }

        if let Some(caps) = long_form().captures(s) {
            let amount = caps[1].parse().map_err(|_| RangeError::TooLong)?;
            let unit = match caps[2].to_ascii_lowercase().as_str() {
                "hour" => WindowUnit::Hour,
                "day" => WindowUnit::Day,
                "week" => WindowUnit::Week,
                "month" => WindowUnit::Month,
                "year" => WindowUnit::Year,
                _ => return Err(unrecognized()),
            };
            return Self::new(amount, unit);
        }

        Err(unrecognized())
    }
}
