//! # Time Axis
//!
//! Decoding of CF-style numeric time coordinates and resolution of calendar
//! year ranges into index windows on the hourly axis.
//!
//! ## Window rules
//!
//! - [`WindowRule::FebruaryBoundary`]: `Jan 1 start_year` through `Feb 1 end_year`,
//!   both included. This is the historical behaviour of the CORA extraction
//!   scripts and the default.
//! - [`WindowRule::CalendarYear`]: `Jan 1 start_year` up to, but excluding,
//!   `Jan 1 (end_year + 1)`.
//!
//! A boundary one cadence step past the last sample closes the window at the
//! last sample.

use crate::error::{CoraError, CoraResult};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Units accepted in a CF `"<unit> since <epoch>"` string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Convert the time unit to a multiplier for seconds
    pub fn to_seconds_multiplier(&self) -> i64 {
        match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Minutes => 60,
            TimeUnit::Hours => 3600,
            TimeUnit::Days => 86400,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => Some(TimeUnit::Seconds),
            "min" | "mins" | "minute" | "minutes" => Some(TimeUnit::Minutes),
            "h" | "hr" | "hrs" | "hour" | "hours" => Some(TimeUnit::Hours),
            "d" | "day" | "days" => Some(TimeUnit::Days),
            _ => None,
        }
    }
}

/// Parsed CF time encoding, e.g. `hours since 1979-01-01 00:00:00`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeEncoding {
    pub unit: TimeUnit,
    pub epoch: NaiveDateTime,
}

impl TimeEncoding {
    pub fn parse(units: &str) -> CoraResult<Self> {
        let (unit, epoch) = units
            .split_once(" since ")
            .ok_or_else(|| CoraError::InvalidData(format!("unsupported time units '{}'", units)))?;

        let unit = TimeUnit::parse(unit.trim())
            .ok_or_else(|| CoraError::InvalidData(format!("unsupported time unit '{}'", unit)))?;
        let epoch = parse_epoch(epoch.trim())
            .ok_or_else(|| CoraError::InvalidData(format!("unparseable time epoch '{}'", epoch)))?;

        Ok(TimeEncoding { unit, epoch })
    }

    pub fn decode_integer(&self, offset: i64) -> Option<NaiveDateTime> {
        let seconds = offset.checked_mul(self.unit.to_seconds_multiplier())?;
        self.epoch.checked_add_signed(TimeDelta::try_seconds(seconds)?)
    }

    /// Decodes a floating-point offset, rounded to the millisecond.
    pub fn decode_float(&self, offset: f64) -> Option<NaiveDateTime> {
        if !offset.is_finite() {
            return None;
        }
        let millis = (offset * self.unit.to_seconds_multiplier() as f64 * 1000.0).round();
        if millis.abs() > i64::MAX as f64 {
            return None;
        }
        self.epoch
            .checked_add_signed(TimeDelta::try_milliseconds(millis as i64)?)
    }
}

fn parse_epoch(s: &str) -> Option<NaiveDateTime> {
    // Strip a trailing zone designator; CORA epochs are UTC
    let s = s.trim_end_matches(" UTC").trim_end_matches('Z');

    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(&format!("{}:00", s), "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Ordered, strictly increasing sequence of timestamps shared by all nodes
#[derive(Debug, Clone, PartialEq)]
pub struct TimeAxis {
    times: Vec<NaiveDateTime>,
}

impl TimeAxis {
    pub fn new(times: Vec<NaiveDateTime>) -> CoraResult<Self> {
        if let Some(pos) = times.windows(2).position(|w| w[0] >= w[1]) {
            return Err(CoraError::InvalidData(format!(
                "time axis is not strictly increasing at index {} ({} then {})",
                pos + 1,
                times[pos],
                times[pos + 1]
            )));
        }
        Ok(TimeAxis { times })
    }

    /// Builds a regular axis of `len` steps starting at `start`.
    pub fn regular(start: NaiveDateTime, step: TimeDelta, len: usize) -> CoraResult<Self> {
        let times = (0..len)
            .map(|i| {
                step.checked_mul(i as i32)
                    .and_then(|offset| start.checked_add_signed(offset))
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| CoraError::InvalidData("regular time axis overflows".to_string()))?;
        TimeAxis::new(times)
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn as_slice(&self) -> &[NaiveDateTime] {
        &self.times
    }

    pub fn first(&self) -> Option<NaiveDateTime> {
        self.times.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDateTime> {
        self.times.last().copied()
    }

    /// Spacing between the last two timestamps.
    pub fn cadence(&self) -> Option<TimeDelta> {
        match self.times.as_slice() {
            [.., a, b] => Some(*b - *a),
            _ => None,
        }
    }

    /// Index of the timestamp exactly equal to `timestamp`.
    pub fn position(&self, timestamp: NaiveDateTime) -> Option<usize> {
        self.times.binary_search(&timestamp).ok()
    }

    /// Position of a boundary timestamp: either an exact match, or `len()` when
    /// the boundary sits one cadence step after the last sample.
    pub fn boundary_position(&self, boundary: NaiveDateTime) -> Option<usize> {
        if let Some(pos) = self.position(boundary) {
            return Some(pos);
        }
        match (self.last(), self.cadence()) {
            (Some(last), Some(step)) if last + step == boundary => Some(self.len()),
            _ => None,
        }
    }

    pub fn slice(&self, range: Range<usize>) -> &[NaiveDateTime] {
        &self.times[range]
    }
}

/// Which calendar boundary closes a year range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowRule {
    #[default]
    FebruaryBoundary,
    CalendarYear,
}

impl WindowRule {
    /// Timestamp that closes the window.
    pub fn end_boundary(&self, end_year: i32) -> Option<NaiveDateTime> {
        let date = match self {
            WindowRule::FebruaryBoundary => NaiveDate::from_ymd_opt(end_year, 2, 1),
            WindowRule::CalendarYear => NaiveDate::from_ymd_opt(end_year.checked_add(1)?, 1, 1),
        };
        date.and_then(|d| d.and_hms_opt(0, 0, 0))
    }

    /// Whether a sample at exactly [`end_boundary`](Self::end_boundary) belongs to the window.
    pub fn includes_boundary(&self) -> bool {
        matches!(self, WindowRule::FebruaryBoundary)
    }
}

/// Inclusive index range `[start, end]` on a time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: usize,
    pub end: usize,
}

impl TimeWindow {
    pub fn new(start: usize, end: usize) -> CoraResult<Self> {
        if start > end {
            return Err(CoraError::InvalidWindow(format!(
                "start index {} is after end index {}",
                start, end
            )));
        }
        Ok(TimeWindow { start, end })
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Half-open range suitable for slicing.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end + 1
    }
}

/// Maps a calendar year range to an inclusive index window on `axis`.
///
/// The start boundary must match a timestamp exactly; see [`TimeAxis::boundary_position`]
/// for how the end boundary resolves.
pub fn resolve_year_window(
    axis: &TimeAxis,
    start_year: i32,
    end_year: i32,
    rule: WindowRule,
) -> CoraResult<TimeWindow> {
    if start_year > end_year {
        return Err(CoraError::InvalidWindow(format!(
            "start year {} is after end year {}",
            start_year, end_year
        )));
    }

    let start_ts = NaiveDate::from_ymd_opt(start_year, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| CoraError::InvalidWindow(format!("year {} out of range", start_year)))?;
    let end_ts = rule
        .end_boundary(end_year)
        .ok_or_else(|| CoraError::InvalidWindow(format!("year {} out of range", end_year)))?;

    let start = axis
        .position(start_ts)
        .ok_or(CoraError::Lookup { timestamp: start_ts })?;
    let boundary = axis
        .boundary_position(end_ts)
        .ok_or(CoraError::Lookup { timestamp: end_ts })?;
    let end = if rule.includes_boundary() && boundary < axis.len() {
        boundary
    } else {
        boundary.saturating_sub(1)
    };

    if boundary <= start || end < start {
        return Err(CoraError::InvalidWindow(format!(
            "no samples between {} and {}",
            start_ts, end_ts
        )));
    }

    log::debug!(
        "Resolved years {}..={} ({:?}) to indices [{}, {}]",
        start_year,
        end_year,
        rule,
        start,
        end
    );
    TimeWindow::new(start, end)
}
