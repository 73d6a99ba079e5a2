//! Geometric comparison of a requested domain against cached domains.

use grid_common::{AxisKind, AxisRange, Domain, DEFAULT_TOLERANCE};
use serde::Serialize;

/// Geographic axes consulted, in priority order. The first one the cached
/// domain constrains decides the classification.
const DECIDING_AXES: [AxisKind; 3] = [AxisKind::Latitude, AxisKind::Longitude, AxisKind::Level];

/// Full extents used when a request leaves an axis unconstrained.
const FULL_LATITUDE: f64 = 180.0;
const FULL_LONGITUDE: f64 = 360.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Overlap {
    /// No overlap.
    Disjoint,
    /// The request lies inside the cached domain.
    Contained,
    /// Partial overlap.
    Overlap,
}

/// Outcome of comparing one cached domain with a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub overlap: Overlap,
    /// Fraction in `[0, 1]` along the deciding axis; 1.0 for CONTAINED.
    pub coverage: f64,
}

impl Classification {
    fn from_coverage(coverage: f64) -> Self {
        let coverage = coverage.clamp(0.0, 1.0);
        let overlap = if coverage == 0.0 {
            Overlap::Disjoint
        } else if coverage == 1.0 {
            Overlap::Contained
        } else {
            Overlap::Overlap
        };
        Self { overlap, coverage }
    }
}

/// Compares domains axis by axis.
#[derive(Debug, Clone, Copy)]
pub struct OverlapClassifier {
    tolerance: f64,
}

impl Default for OverlapClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl OverlapClassifier {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Classify `requested` against `cached`.
    ///
    /// Only one axis decides: the first of latitude, longitude and level that
    /// `cached` constrains with the same CRS as the request. A cached domain
    /// without any geographic constraint contains every request.
    pub fn classify(&self, cached: &Domain, requested: &Domain) -> Classification {
        for kind in &DECIDING_AXES {
            let Some(c) = cached.get(kind) else {
                continue;
            };
            let Some(r) = requested.get(kind) else {
                // The request wants the full extent of an axis the cache has cut
                return Classification {
                    overlap: Overlap::Overlap,
                    coverage: unconstrained_coverage(kind, c),
                };
            };
            if r.crs != c.crs {
                continue;
            }
            return Classification::from_coverage(self.coverage(c, r));
        }
        Classification {
            overlap: Overlap::Contained,
            coverage: 1.0,
        }
    }

    fn coverage(&self, cached: &AxisRange, requested: &AxisRange) -> f64 {
        let tol = self.tolerance;
        let (c_lo, c_hi) = ordered(cached);
        let span = c_hi - c_lo;

        if cached.is_point() || span <= tol {
            if requested.is_point() && (requested.start() - c_lo).abs() <= tol {
                return 1.0;
            }
            return 0.0;
        }

        if requested.is_point() {
            return if cached.contains_value(requested.start(), tol) {
                1.0
            } else {
                0.0
            };
        }

        let (r_lo, r_hi) = ordered(requested);
        if r_lo <= c_lo {
            (r_hi - c_lo).clamp(0.0, span) / span
        } else if r_hi <= c_hi {
            1.0
        } else {
            ((c_hi - r_lo) / span).clamp(0.0, 1.0)
        }
    }

    /// Pick the smallest cached domain that contains the request.
    ///
    /// Returns the index into `candidates`.
    pub fn best_containing<'a, I>(&self, requested: &Domain, candidates: I) -> Option<usize>
    where
        I: IntoIterator<Item = &'a Domain>,
    {
        candidates
            .into_iter()
            .enumerate()
            .filter(|(_, cached)| self.classify(cached, requested).overlap == Overlap::Contained)
            .map(|(i, cached)| (i, cached.area()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Partially overlapping candidates ordered by decreasing coverage.
    pub fn rank_overlapping<'a, I>(&self, requested: &Domain, candidates: I) -> Vec<(usize, f64)>
    where
        I: IntoIterator<Item = &'a Domain>,
    {
        let mut ranked: Vec<(usize, f64)> = candidates
            .into_iter()
            .enumerate()
            .map(|(i, cached)| (i, self.classify(cached, requested)))
            .filter(|(_, c)| c.overlap == Overlap::Overlap)
            .map(|(i, c)| (i, c.coverage))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

fn ordered(range: &AxisRange) -> (f64, f64) {
    let (a, b) = (range.start(), range.end());
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Share of an unconstrained axis covered by a cached range.
fn unconstrained_coverage(kind: &AxisKind, cached: &AxisRange) -> f64 {
    let full = match kind {
        AxisKind::Latitude => FULL_LATITUDE,
        AxisKind::Longitude => FULL_LONGITUDE,
        _ => return 0.0,
    };
    (cached.span() / full).clamp(0.0, 1.0)
}
