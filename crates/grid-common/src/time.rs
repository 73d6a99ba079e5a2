//! CF-style time reference units ("hours since 2000-01-01 00:00:00").

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported time unit: {0}")]
    UnsupportedUnit(String),

    #[error("Time offset out of range: {0}")]
    OutOfRange(f64),
}

/// Unit of a numeric time offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl TimeUnit {
    pub fn seconds(&self) -> f64 {
        match self {
            TimeUnit::Days => 86_400.0,
            TimeUnit::Hours => 3_600.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Seconds => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Days => "days",
            TimeUnit::Hours => "hours",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Seconds => "seconds",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "days" | "day" | "d" => Ok(TimeUnit::Days),
            "hours" | "hour" | "hrs" | "h" => Ok(TimeUnit::Hours),
            "minutes" | "minute" | "mins" | "min" => Ok(TimeUnit::Minutes),
            "seconds" | "second" | "secs" | "sec" | "s" => Ok(TimeUnit::Seconds),
            other => Err(TimeParseError::UnsupportedUnit(other.to_string())),
        }
    }
}

/// Reference units of a numeric time axis: a unit and an epoch.
///
/// Only the standard (proleptic Gregorian) calendar is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeUnits {
    pub unit: TimeUnit,
    pub epoch: DateTime<Utc>,
}

impl TimeUnits {
    pub fn new(unit: TimeUnit, epoch: DateTime<Utc>) -> Self {
        Self { unit, epoch }
    }

    /// Parse `"<unit> since <date>[ <time>]"`.
    pub fn parse(s: &str) -> Result<Self, TimeParseError> {
        let trimmed = s.trim();
        let (unit, rest) = trimmed
            .split_once(" since ")
            .ok_or_else(|| TimeParseError::InvalidFormat(s.to_string()))?;
        let unit = unit.trim().parse::<TimeUnit>()?;
        let epoch = parse_epoch(rest.trim())?;
        Ok(Self { unit, epoch })
    }

    /// Absolute time of an offset in these units.
    pub fn to_datetime(&self, offset: f64) -> Result<DateTime<Utc>, TimeParseError> {
        let millis = (offset * self.unit.seconds() * 1000.0).round();
        if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
            return Err(TimeParseError::OutOfRange(offset));
        }
        Duration::try_milliseconds(millis as i64)
            .and_then(|delta| self.epoch.checked_add_signed(delta))
            .ok_or(TimeParseError::OutOfRange(offset))
    }

    /// Offset of an absolute time in these units.
    pub fn offset_of(&self, time: DateTime<Utc>) -> f64 {
        let millis = (time - self.epoch).num_milliseconds() as f64;
        millis / 1000.0 / self.unit.seconds()
    }

    /// Re-express an offset in these units as an offset in `target`.
    pub fn remap(&self, offset: f64, target: &TimeUnits) -> Result<f64, TimeParseError> {
        if self == target {
            return Ok(offset);
        }
        Ok(target.offset_of(self.to_datetime(offset)?))
    }
}

impl fmt::Display for TimeUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} since {}",
            self.unit.as_str(),
            self.epoch.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

impl FromStr for TimeUnits {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeUnits::parse(s)
    }
}

impl Serialize for TimeUnits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeUnits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TimeUnits::parse(&s).map_err(serde::de::Error::custom)
    }
}

fn parse_epoch(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Trailing zone designators such as "Z" or " UTC" are common in CF files
    let cleaned = s
        .trim_end_matches(" UTC")
        .trim_end_matches('Z')
        .replace('T', " ");

    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&cleaned, fmt) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    let date_part = cleaned.split_whitespace().next().unwrap_or_default();
    if let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(TimeParseError::InvalidFormat(s.to_string()))
}
