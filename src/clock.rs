use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Minutes since local midnight. Window ends may run past 1440.
pub type Minutes = u32;

const MINUTES_PER_DAY: Minutes = 24 * 60;

/// A wall-clock time of day with minute resolution, in the professional's local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Clock(u16);

impl Clock {
    pub const MIDNIGHT: Clock = Clock(0);
    pub const LAST: Clock = Clock(MINUTES_PER_DAY as u16 - 1);

    pub fn from_hm(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Clock(hour as u16 * 60 + minute as u16))
        } else {
            None
        }
    }

    pub fn minutes(self) -> Minutes {
        self.0 as Minutes
    }

    /// End of an interval starting at `self` and lasting `duration_minutes`.
    pub fn end(self, duration_minutes: u32) -> Minutes {
        self.minutes() + duration_minutes
    }

    /// Half-open window `[self, self + duration)`.
    pub fn window(self, duration_minutes: u32) -> Window {
        Window::new(self.minutes(), self.end(duration_minutes))
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_minutes(self.minutes()))
    }
}

/// Render minutes as `HH:MM`, wrapping past midnight.
pub fn format_minutes(m: Minutes) -> String {
    let m = m % MINUTES_PER_DAY;
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Half-open interval `[start, end)` in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Minutes,
    pub end: Minutes,
}

impl Window {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Minutes {
        self.end.saturating_sub(self.start)
    }

    /// Back-to-back and zero-length windows never overlap.
    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", format_minutes(self.start), format_minutes(self.end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    BadTime(String),
    BadDate(String),
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::BadTime(s) => write!(f, "invalid time {s:?} (use HH:MM)"),
            ClockError::BadDate(s) => write!(f, "invalid date {s:?} (use YYYY-MM-DD)"),
        }
    }
}

impl std::error::Error for ClockError {}

/// Parse a strict 24-hour `HH:MM`. No seconds, no AM/PM, no single-digit hours.
pub fn parse_clock(s: &str) -> Result<Clock, ClockError> {
    let bad = || ClockError::BadTime(s.to_string());
    let b = s.as_bytes();
    if b.len() != 5 || b[2] != b':' {
        return Err(bad());
    }
    let hour = two_digits(b[0], b[1]).ok_or_else(bad)?;
    let minute = two_digits(b[3], b[4]).ok_or_else(bad)?;
    Clock::from_hm(hour, minute).ok_or_else(bad)
}

/// Parse a strict `YYYY-MM-DD` calendar date.
pub fn parse_date(s: &str) -> Result<NaiveDate, ClockError> {
    let b = s.as_bytes();
    let shape_ok = b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && b.iter()
            .enumerate()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit());
    if !shape_ok {
        return Err(ClockError::BadDate(s.to_string()));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ClockError::BadDate(s.to_string()))
}

fn two_digits(hi: u8, lo: u8) -> Option<u8> {
    if hi.is_ascii_digit() && lo.is_ascii_digit() {
        Some((hi - b'0') * 10 + (lo - b'0'))
    } else {
        None
    }
}
