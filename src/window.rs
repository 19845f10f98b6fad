//! Clock-aligned time windows.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

pub const MIN_INTERVAL: Duration = Duration::from_secs(10);
pub const MAX_INTERVAL: Duration = Duration::from_secs(8_640_000);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

/// Half-open interval `[start, end)` in seconds since the UNIX epoch.
///
/// Directory name is `<start>-<end>` in decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Window {
    pub start: u64,
    pub end: u64,
}

impl Window {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// The window of length `interval_secs` that contains `now`.
    pub fn containing(now: u64, interval_secs: u64) -> Self {
        let start = align_start(now, interval_secs);
        Self {
            start,
            end: start.saturating_add(interval_secs),
        }
    }

    pub fn name(&self) -> String {
        self.to_string()
    }
}

/// `floor(now / interval) * interval`.
pub fn align_start(now: u64, interval_secs: u64) -> u64 {
    let interval = interval_secs.max(1);
    (now / interval) * interval
}

/// Clamps a configured interval into the supported range.
pub fn clamp_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_INTERVAL, MAX_INTERVAL)
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for Window {
    type Err = Error;

    /// Parses `<start>-<end>`; rejects `start >= end`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidWindow(s.to_string());
        let (start, end) = s.split_once('-').ok_or_else(invalid)?;
        if start.is_empty() || end.is_empty() {
            return Err(invalid());
        }
        if !start.bytes().all(|b| b.is_ascii_digit()) || !end.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let start: u64 = start.parse().map_err(|_| invalid())?;
        let end: u64 = end.parse().map_err(|_| invalid())?;
        if start >= end {
            return Err(invalid());
        }
        Ok(Window { start, end })
    }
}
