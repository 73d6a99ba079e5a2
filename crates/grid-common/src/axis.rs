//! Axis identification and per-axis extents.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Kind of a dataset axis.
///
/// Source files name their axes in many ways (`lat`, `latitude`, `y`...);
/// all names are normalized to a kind so domains from different sources can
/// be compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AxisKind {
    Time,
    Latitude,
    Longitude,
    Level,
    Other(String),
}

impl AxisKind {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "time" | "t" => AxisKind::Time,
            "lat" | "latitude" | "y" => AxisKind::Latitude,
            "lon" | "longitude" | "x" => AxisKind::Longitude,
            "lev" | "level" | "plev" | "z" => AxisKind::Level,
            _ => AxisKind::Other(name.to_string()),
        }
    }

    /// Canonical short name.
    pub fn name(&self) -> &str {
        match self {
            AxisKind::Time => "time",
            AxisKind::Latitude => "lat",
            AxisKind::Longitude => "lon",
            AxisKind::Level => "lev",
            AxisKind::Other(name) => name,
        }
    }

    pub fn is_time(&self) -> bool {
        matches!(self, AxisKind::Time)
    }

    /// Latitude, longitude or level.
    pub fn is_geographic(&self) -> bool {
        matches!(
            self,
            AxisKind::Latitude | AxisKind::Longitude | AxisKind::Level
        )
    }
}

impl fmt::Display for AxisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for AxisKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for AxisKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(AxisKind::from_name(&name))
    }
}

/// Coordinate reference of an axis range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Crs {
    /// Coordinate values; bounds are inclusive.
    #[default]
    Values,
    /// Integer positions; `[start, end)`.
    Indices,
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Values => write!(f, "values"),
            Crs::Indices => write!(f, "indices"),
        }
    }
}

/// Either a single coordinate or a pair of bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Extent {
    Point(f64),
    Span { start: f64, end: f64 },
}

/// Extent of one axis of a [`crate::Domain`].
#[derive(Debug, Clone, PartialEq)]
pub struct AxisRange {
    pub crs: Crs,
    pub extent: Extent,
    pub step: Option<f64>,
    /// Reference units for value-space time bounds, e.g. `days since 2000-01-01`.
    pub units: Option<String>,
}

impl AxisRange {
    pub fn values(start: f64, end: f64) -> Self {
        Self {
            crs: Crs::Values,
            extent: Extent::Span { start, end },
            step: None,
            units: None,
        }
    }

    pub fn point(value: f64) -> Self {
        Self {
            crs: Crs::Values,
            extent: Extent::Point(value),
            step: None,
            units: None,
        }
    }

    pub fn indices(start: usize, stop: usize) -> Self {
        Self {
            crs: Crs::Indices,
            extent: Extent::Span {
                start: start as f64,
                end: stop as f64,
            },
            step: None,
            units: None,
        }
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn start(&self) -> f64 {
        match self.extent {
            Extent::Point(v) => v,
            Extent::Span { start, .. } => start,
        }
    }

    pub fn end(&self) -> f64 {
        match self.extent {
            Extent::Point(v) => v,
            Extent::Span { end, .. } => end,
        }
    }

    pub fn is_point(&self) -> bool {
        matches!(self.extent, Extent::Point(_))
    }

    /// Width of the range; zero for a point.
    pub fn span(&self) -> f64 {
        match self.extent {
            Extent::Point(_) => 0.0,
            Extent::Span { start, end } => (end - start).abs(),
        }
    }

    /// Inclusive containment with tolerance.
    pub fn contains_value(&self, value: f64, tolerance: f64) -> bool {
        match self.extent {
            Extent::Point(v) => (v - value).abs() <= tolerance,
            Extent::Span { start, end } => {
                let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
                value >= lo - tolerance && value <= hi + tolerance
            }
        }
    }

    /// Compare bounds, step and CRS. A tolerance of zero compares exactly.
    pub fn approx_eq(&self, other: &AxisRange, tolerance: f64) -> bool {
        let close = |a: f64, b: f64| {
            if tolerance == 0.0 {
                a == b
            } else {
                (a - b).abs() <= tolerance
            }
        };
        if self.crs != other.crs {
            return false;
        }
        let extent_eq = match (self.extent, other.extent) {
            (Extent::Point(a), Extent::Point(b)) => close(a, b),
            (Extent::Span { start: s1, end: e1 }, Extent::Span { start: s2, end: e2 }) => {
                close(s1, s2) && close(e1, e2)
            }
            _ => false,
        };
        let step_eq = match (self.step, other.step) {
            (None, None) => true,
            (Some(a), Some(b)) => close(a, b),
            _ => false,
        };
        extent_eq && step_eq
    }

    /// Index slice of an index-space range. Value-space ranges return `None`.
    pub fn to_index_slice(&self) -> Option<IndexSlice> {
        if self.crs != Crs::Indices {
            return None;
        }
        let step = self.step.map(|s| s.max(1.0) as usize).unwrap_or(1);
        let slice = match self.extent {
            Extent::Point(v) => {
                let i = v.max(0.0) as usize;
                IndexSlice::new(i, i.saturating_add(1), 1)
            }
            Extent::Span { start, end } => {
                IndexSlice::new(start.max(0.0) as usize, end.max(0.0) as usize, step)
            }
        };
        Some(slice)
    }
}

/// A strided half-open index selection `[start, stop)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexSlice {
    pub start: usize,
    pub stop: usize,
    pub step: usize,
}

impl IndexSlice {
    pub fn new(start: usize, stop: usize, step: usize) -> Self {
        Self {
            start,
            stop,
            step: step.max(1),
        }
    }

    /// Full extent of an axis of length `n`.
    pub fn full(n: usize) -> Self {
        Self::new(0, n, 1)
    }

    /// Number of selected positions.
    pub fn len(&self) -> usize {
        if self.stop <= self.start {
            0
        } else {
            (self.stop - self.start).div_ceil(self.step)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Selected positions in order.
    pub fn indices(&self) -> impl Iterator<Item = usize> {
        (self.start..self.stop).step_by(self.step)
    }

    pub fn to_range(&self) -> AxisRange {
        let range = AxisRange::indices(self.start, self.stop);
        if self.step > 1 {
            range.with_step(self.step as f64)
        } else {
            range
        }
    }
}

impl fmt::Display for IndexSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.start, self.stop, self.step)
    }
}

impl FromStr for IndexSlice {
    type Err = String;

    /// Parse the `start:stop:step` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [start, stop, step] = parts.as_slice() else {
            return Err(format!("expected start:stop:step, got '{}'", s));
        };
        let parse = |v: &str| {
            v.trim()
                .parse::<usize>()
                .map_err(|e| format!("invalid slice bound '{}': {}", v, e))
        };
        Ok(IndexSlice::new(parse(start)?, parse(stop)?, parse(step)?))
    }
}
