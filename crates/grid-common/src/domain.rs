//! Multi-axis sub-regions.

use crate::axis::{AxisKind, AxisRange, Crs, Extent};
use crate::error::{GridError, GridResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Tolerance used when comparing non-time coordinates.
pub const DEFAULT_TOLERANCE: f64 = 0.001;

/// Latitude span assumed when a domain leaves latitude unconstrained.
const FULL_LATITUDE_SPAN: f64 = 180.0;
/// Longitude span assumed when a domain leaves longitude unconstrained.
const FULL_LONGITUDE_SPAN: f64 = 360.0;

/// A sub-region: at most one [`AxisRange`] per axis kind.
///
/// An axis that is not present is unconstrained (the full native extent).
/// Insertion order is kept because it decides which axis gets partitioned.
#[derive(Debug, Clone, Default)]
pub struct Domain {
    axes: Vec<(AxisKind, AxisRange)>,
}

impl Domain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Domain::insert`].
    pub fn with(mut self, kind: AxisKind, range: AxisRange) -> Self {
        self.insert(kind, range);
        self
    }

    /// Set the range of an axis, returning the previous one.
    pub fn insert(&mut self, kind: AxisKind, range: AxisRange) -> Option<AxisRange> {
        if let Some(slot) = self.axes.iter_mut().find(|(k, _)| *k == kind) {
            return Some(std::mem::replace(&mut slot.1, range));
        }
        self.axes.push((kind, range));
        None
    }

    pub fn remove(&mut self, kind: &AxisKind) -> Option<AxisRange> {
        let pos = self.axes.iter().position(|(k, _)| k == kind)?;
        Some(self.axes.remove(pos).1)
    }

    pub fn get(&self, kind: &AxisKind) -> Option<&AxisRange> {
        self.axes.iter().find(|(k, _)| k == kind).map(|(_, r)| r)
    }

    pub fn contains_axis(&self, kind: &AxisKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn time(&self) -> Option<&AxisRange> {
        self.get(&AxisKind::Time)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AxisKind, &AxisRange)> {
        self.axes.iter().map(|(k, r)| (k, r))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &AxisKind> {
        self.axes.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Compare every axis present in either domain.
    ///
    /// Time bounds compare exactly; all other axes within `tolerance`.
    pub fn approx_eq(&self, other: &Domain, tolerance: f64) -> bool {
        let covered = self
            .kinds()
            .all(|k| other.contains_axis(k))
            && other.kinds().all(|k| self.contains_axis(k));
        if !covered {
            return false;
        }
        self.iter().all(|(kind, range)| {
            let Some(theirs) = other.get(kind) else {
                return false;
            };
            let tol = if kind.is_time() { 0.0 } else { tolerance };
            range.approx_eq(theirs, tol)
        })
    }

    /// Latitude span times longitude span.
    ///
    /// Missing axes count as the full globe (180 and 360); a point counts as
    /// zero width.
    pub fn area(&self) -> f64 {
        let lat = self
            .get(&AxisKind::Latitude)
            .map(AxisRange::span)
            .unwrap_or(FULL_LATITUDE_SPAN);
        let lon = self
            .get(&AxisKind::Longitude)
            .map(AxisRange::span)
            .unwrap_or(FULL_LONGITUDE_SPAN);
        lat * lon
    }

    /// Dimension list form used for persistence and job files.
    pub fn to_dimensions(&self) -> Vec<Dimension> {
        self.iter()
            .map(|(kind, range)| Dimension::from_range(kind, range))
            .collect()
    }

    pub fn from_dimensions(dims: Vec<Dimension>) -> GridResult<Self> {
        let mut domain = Domain::new();
        for dim in dims {
            let kind = AxisKind::from_name(&dim.name);
            if domain.contains_axis(&kind) {
                return Err(GridError::InvalidDomain(format!(
                    "axis '{}' given more than once",
                    kind
                )));
            }
            let range = dim.into_range()?;
            domain.insert(kind, range);
        }
        Ok(domain)
    }
}

impl PartialEq for Domain {
    fn eq(&self, other: &Self) -> bool {
        self.approx_eq(other, DEFAULT_TOLERANCE)
    }
}

impl FromIterator<(AxisKind, AxisRange)> for Domain {
    fn from_iter<I: IntoIterator<Item = (AxisKind, AxisRange)>>(iter: I) -> Self {
        let mut domain = Domain::new();
        for (kind, range) in iter {
            domain.insert(kind, range);
        }
        domain
    }
}

/// Serialized form of one axis of a domain.
///
/// ```yaml
/// - name: lat
///   start: -45
///   end: 45
/// - name: time
///   crs: indices
///   start: 0
///   end: 12
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub start: f64,
    /// Omitted for a single point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default)]
    pub crs: Crs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl Dimension {
    fn from_range(kind: &AxisKind, range: &AxisRange) -> Self {
        let (start, end) = match range.extent {
            Extent::Point(v) => (v, None),
            Extent::Span { start, end } => (start, Some(end)),
        };
        Self {
            name: kind.name().to_string(),
            start,
            end,
            step: range.step,
            crs: range.crs,
            units: range.units.clone(),
        }
    }

    fn into_range(self) -> GridResult<AxisRange> {
        if !self.start.is_finite() || self.end.is_some_and(|e| !e.is_finite()) {
            return Err(GridError::InvalidDomain(format!(
                "axis '{}' has non-finite bounds",
                self.name
            )));
        }
        if let Some(step) = self.step {
            if !step.is_finite() || step <= 0.0 {
                return Err(GridError::InvalidDomain(format!(
                    "axis '{}' has non-positive step {}",
                    self.name, step
                )));
            }
        }
        let extent = match self.end {
            Some(end) => Extent::Span {
                start: self.start,
                end,
            },
            None => Extent::Point(self.start),
        };
        Ok(AxisRange {
            crs: self.crs,
            extent,
            step: self.step,
            units: self.units,
        })
    }
}

impl Serialize for Domain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_dimensions().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Domain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let dims = Vec::<Dimension>::deserialize(deserializer)?;
        Domain::from_dimensions(dims).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(lat: (f64, f64), lon: (f64, f64)) -> Domain {
        Domain::new()
            .with(AxisKind::Latitude, AxisRange::values(lat.0, lat.1))
            .with(AxisKind::Longitude, AxisRange::values(lon.0, lon.1))
    }

    #[test]
    fn test_insert_replaces_existing_axis() {
        let mut d = Domain::new().with(AxisKind::Latitude, AxisRange::values(0.0, 10.0));
        let prev = d.insert(AxisKind::Latitude, AxisRange::values(5.0, 6.0));
        assert_eq!(prev.map(|r| r.start()), Some(0.0));
        assert_eq!(d.len(), 1);
        assert_eq!(d.get(&AxisKind::Latitude).map(|r| r.end()), Some(6.0));
    }

    #[test]
    fn test_equality_uses_tolerance_for_space() {
        let a = region((-10.0, 10.0), (0.0, 90.0));
        let b = region((-10.0005, 10.0005), (0.0, 90.0));
        assert_eq!(a, b);
        let c = region((-10.01, 10.0), (0.0, 90.0));
        assert_ne!(a, c);
    }

    #[test]
    fn test_equality_time_is_exact() {
        let a = Domain::new().with(AxisKind::Time, AxisRange::values(0.0, 10.0));
        let b = Domain::new().with(AxisKind::Time, AxisRange::values(0.0, 10.0005));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_equality_requires_same_axes() {
        let a = region((0.0, 1.0), (0.0, 1.0));
        let b = Domain::new().with(AxisKind::Latitude, AxisRange::values(0.0, 1.0));
        assert_ne!(a, b);
        assert_ne!(b, a);
    }

    #[test]
    fn test_area_defaults() {
        assert_eq!(Domain::new().area(), 180.0 * 360.0);
        assert_eq!(region((0.0, 10.0), (0.0, 20.0)).area(), 200.0);
        let lat_only = Domain::new().with(AxisKind::Latitude, AxisRange::values(0.0, 10.0));
        assert_eq!(lat_only.area(), 3600.0);
        let point = Domain::new()
            .with(AxisKind::Latitude, AxisRange::point(10.0))
            .with(AxisKind::Longitude, AxisRange::values(0.0, 20.0));
        assert_eq!(point.area(), 0.0);
    }

    #[test]
    fn test_yaml_dimensions() {
        let yaml = r#"
- name: latitude
  start: -45
  end: 45
- name: time
  crs: indices
  start: 0
  end: 12
  step: 2
- name: plev
  start: 850
"#;
        let d: Domain = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(d.len(), 3);
        let time = d.time().unwrap();
        assert_eq!(time.crs, Crs::Indices);
        assert_eq!(time.step, Some(2.0));
        assert!(d.get(&AxisKind::Level).unwrap().is_point());
        assert_eq!(d.kinds().next(), Some(&AxisKind::Latitude));
    }

    #[test]
    fn test_duplicate_axis_rejected() {
        let dims = vec![
            Dimension {
                name: "lat".into(),
                start: 0.0,
                end: Some(1.0),
                step: None,
                crs: Crs::Values,
                units: None,
            },
            Dimension {
                name: "latitude".into(),
                start: 0.0,
                end: Some(2.0),
                step: None,
                crs: Crs::Values,
                units: None,
            },
        ];
        assert!(matches!(
            Domain::from_dimensions(dims),
            Err(GridError::InvalidDomain(_))
        ));
    }

    #[test]
    fn test_bad_steps_rejected() {
        for step in ["0", "-2", ".nan", ".inf"] {
            let yaml = format!("- name: time\n  crs: indices\n  start: 0\n  end: 10\n  step: {}\n", step);
            assert!(
                serde_yaml::from_str::<Domain>(&yaml).is_err(),
                "step {} accepted",
                step
            );
        }
    }

    #[test]
    fn test_json_roundtrip_keeps_order() {
        let d = Domain::new()
            .with(AxisKind::Time, AxisRange::indices(0, 5))
            .with(AxisKind::Latitude, AxisRange::values(1.0, 2.0));
        let json = serde_json::to_string(&d).unwrap();
        let back: Domain = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
        assert_eq!(back.kinds().next(), Some(&AxisKind::Time));
    }
}
