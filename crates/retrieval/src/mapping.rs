//! Mapping a requested domain onto the native axes of each source.

use domain_cache::CacheRequest;
use grid_common::{AxisKind, AxisRange, Crs, Domain, Extent, GridError, GridResult, IndexSlice, TimeUnits};
use grid_io::{AxisCoords, GridChunk, VariableInfo};
use tracing::{debug, info};

/// Time offsets are compared with this tolerance after unit conversion.
const TIME_TOLERANCE: f64 = 1e-6;

/// The part of one source a job reads.
#[derive(Debug, Clone)]
pub struct SourceSelection {
    /// Position of the input in the job.
    pub input: usize,
    pub uri: String,
    pub variable: String,
    /// Native axes of the variable, in array order.
    pub axes: Vec<AxisCoords>,
    /// Selected indices of every axis, in array order.
    pub slices: Vec<(AxisKind, IndexSlice)>,
    /// Reference units of the native time axis.
    pub time_units: Option<TimeUnits>,
}

impl SourceSelection {
    pub fn shape(&self) -> Vec<usize> {
        self.slices.iter().map(|(_, s)| s.len()).collect()
    }

    /// Selected lengths of every axis except time.
    pub fn spatial_shape(&self) -> Vec<usize> {
        self.slices
            .iter()
            .filter(|(k, _)| !k.is_time())
            .map(|(_, s)| s.len())
            .collect()
    }

    pub fn time_slice(&self) -> Option<IndexSlice> {
        self.slices
            .iter()
            .find(|(k, _)| k.is_time())
            .map(|(_, s)| *s)
    }

    pub fn selection(&self) -> Vec<IndexSlice> {
        self.slices.iter().map(|(_, s)| *s).collect()
    }

    /// Coordinates of the selected positions.
    pub fn selected_axes(&self) -> Vec<AxisCoords> {
        self.axes
            .iter()
            .zip(&self.slices)
            .map(|(axis, (_, slice))| axis.select(slice))
            .collect()
    }

    /// Extent of the selection: index space for time, coordinates elsewhere.
    pub fn extent(&self) -> Domain {
        self.selected_axes()
            .into_iter()
            .zip(&self.slices)
            .filter_map(|(axis, (kind, slice))| {
                if kind.is_time() {
                    return Some((kind.clone(), slice.to_range()));
                }
                let first = *axis.values.first()?;
                let last = *axis.values.last()?;
                let range = if axis.len() == 1 {
                    AxisRange::point(first)
                } else {
                    AxisRange::values(first, last)
                };
                Some((kind.clone(), range))
            })
            .collect()
    }

    pub fn cache_request(&self) -> CacheRequest {
        CacheRequest {
            source_uri: self.uri.clone(),
            variable: self.variable.clone(),
            slices: self.slices.clone(),
            extent: self.extent(),
        }
    }

    /// Re-express a chunk's time coordinates in `base` units.
    pub fn remap_time(&self, chunk: &mut GridChunk, base: Option<&TimeUnits>) -> GridResult<()> {
        let (Some(native), Some(base)) = (self.time_units.as_ref(), base) else {
            return Ok(());
        };
        let Some(time) = chunk.axis_mut(&AxisKind::Time) else {
            return Ok(());
        };
        if native != base {
            for v in time.values.iter_mut() {
                *v = native
                    .remap(*v, base)
                    .map_err(|e| GridError::access(&self.uri, format!("time coordinate: {}", e)))?;
            }
        }
        time.units = Some(base.to_string());
        Ok(())
    }
}

/// Selections of every source the domain maps onto, in time order.
#[derive(Debug, Clone)]
pub struct MappedSources {
    /// Time units of the earliest source; every output time is expressed in them.
    pub base_units: Option<TimeUnits>,
    pub selections: Vec<SourceSelection>,
    /// Sources the domain does not intersect.
    pub dropped: Vec<String>,
}

/// Maps domains onto source coordinates.
#[derive(Debug, Clone, Copy)]
pub struct DomainMapper {
    tolerance: f64,
}

impl Default for DomainMapper {
    fn default() -> Self {
        Self::new(grid_common::DEFAULT_TOLERANCE)
    }
}

impl DomainMapper {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Map `domain` onto every source.
    ///
    /// `sources` are `(uri, variable)` pairs in job order. Sources are sorted
    /// by their first time value; an index-space time range addresses the
    /// concatenation of all sources in that order.
    pub fn map(&self, sources: &[(String, VariableInfo)], domain: &Domain) -> GridResult<MappedSources> {
        let mut ordered = Vec::with_capacity(sources.len());
        for (input, (uri, info)) in sources.iter().enumerate() {
            let time_units = time_units_of(uri, info)?;
            let first = first_time(uri, info, time_units.as_ref())?;
            ordered.push((input, uri, info, time_units, first));
        }
        // Sources without a time axis keep their job order, ahead of timed ones
        ordered.sort_by(|a, b| match (a.4, b.4) {
            (Some(x), Some(y)) => x.cmp(&y),
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        let base_units = ordered.iter().find_map(|o| o.3);

        for kind in domain.kinds() {
            if !sources
                .iter()
                .any(|(_, info)| info.axes.iter().any(|a| &a.kind == kind))
            {
                debug!(axis = %kind, "Requested axis not present in any source");
            }
        }

        let mut selections = Vec::new();
        let mut dropped = Vec::new();
        let mut time_offset = 0usize;

        for (input, uri, info, time_units, _) in ordered {
            let mut slices = Vec::with_capacity(info.axes.len());
            for axis in &info.axes {
                let slice = match domain.get(&axis.kind) {
                    None => IndexSlice::full(axis.len()),
                    Some(range) if axis.kind.is_time() => {
                        self.map_time(axis, range, time_offset, time_units.as_ref(), base_units.as_ref())?
                    }
                    Some(range) => self.map_axis(axis, range),
                };
                slices.push((axis.kind.clone(), slice));
            }
            if let Some(time) = info.axes.iter().find(|a| a.kind.is_time()) {
                time_offset += time.len();
            }

            if let Some((kind, _)) = slices.iter().find(|(_, s)| s.is_empty()) {
                info!(uri = %uri, axis = %kind, "Domain does not intersect source");
                dropped.push(uri.clone());
                continue;
            }

            debug!(
                uri = %uri,
                selection = ?slices.iter().map(|(k, s)| format!("{}={}", k, s)).collect::<Vec<_>>(),
                "Mapped domain onto source"
            );
            selections.push(SourceSelection {
                input,
                uri: uri.clone(),
                variable: info.name.clone(),
                axes: info.axes.clone(),
                slices,
                time_units,
            });
        }

        if selections.is_empty() {
            return Err(GridError::domain_mapping(format!(
                "{} input(s) checked, none intersect the requested domain",
                sources.len()
            )));
        }

        let reference = selections[0].spatial_shape();
        if let Some(other) = selections.iter().find(|s| s.spatial_shape() != reference) {
            return Err(GridError::shape_mismatch(format!(
                "'{}' selects {:?} but '{}' selects {:?}",
                selections[0].uri,
                reference,
                other.uri,
                other.spatial_shape()
            )));
        }

        Ok(MappedSources {
            base_units,
            selections,
            dropped,
        })
    }

    /// Map a range onto one non-time axis.
    pub fn map_axis(&self, axis: &AxisCoords, range: &AxisRange) -> IndexSlice {
        match range.crs {
            Crs::Indices => clamp_indices(range, axis.len()),
            Crs::Values => map_values(&axis.values, range, self.tolerance),
        }
    }

    fn map_time(
        &self,
        axis: &AxisCoords,
        range: &AxisRange,
        offset: usize,
        native: Option<&TimeUnits>,
        base: Option<&TimeUnits>,
    ) -> GridResult<IndexSlice> {
        if range.crs == Crs::Indices {
            return Ok(local_slice(range, offset, axis.len()));
        }

        let request_units = match &range.units {
            Some(units) => Some(
                TimeUnits::parse(units)
                    .map_err(|e| GridError::InvalidDomain(format!("time units: {}", e)))?,
            ),
            None => base.copied(),
        };
        let convert = |v: f64| match (request_units.as_ref(), native) {
            (Some(from), Some(to)) => from
                .remap(v, to)
                .map_err(|e| GridError::InvalidDomain(format!("time bound: {}", e))),
            _ => Ok(v),
        };
        let converted = AxisRange {
            extent: match range.extent {
                Extent::Point(v) => Extent::Point(convert(v)?),
                Extent::Span { start, end } => Extent::Span {
                    start: convert(start)?,
                    end: convert(end)?,
                },
            },
            ..range.clone()
        };
        Ok(map_values(&axis.values, &converted, TIME_TOLERANCE))
    }

    /// Re-map a selection onto a cached dataset that holds a superset of it.
    ///
    /// Returns `None` unless the cached coordinates at the mapped positions
    /// equal the coordinates the selection reads from its source.
    pub fn remap_onto(&self, selection: &SourceSelection, cached: &[AxisCoords]) -> Option<Vec<(AxisKind, IndexSlice)>> {
        if cached.len() != selection.axes.len() {
            return None;
        }
        let mut slices = Vec::with_capacity(cached.len());
        for ((kind, slice), (wanted, target)) in selection
            .slices
            .iter()
            .zip(selection.selected_axes().iter().zip(cached))
        {
            if &target.kind != kind {
                return None;
            }
            let tol = if kind.is_time() { TIME_TOLERANCE } else { self.tolerance };
            let (first, last) = (*wanted.values.first()?, *wanted.values.last()?);
            let range = AxisRange::values(first, last);
            let mapped = map_values(&target.values, &range, tol);
            let mapped = IndexSlice::new(mapped.start, mapped.stop, slice.step);

            let got = target.select(&mapped);
            let same = got.len() == wanted.len()
                && got
                    .values
                    .iter()
                    .zip(&wanted.values)
                    .all(|(a, b)| (a - b).abs() <= tol);
            if !same {
                return None;
            }
            slices.push((kind.clone(), mapped));
        }
        Some(slices)
    }
}

fn time_units_of(uri: &str, info: &VariableInfo) -> GridResult<Option<TimeUnits>> {
    let Some(units) = info
        .axes
        .iter()
        .find(|a| a.kind.is_time())
        .and_then(|a| a.units.as_deref())
    else {
        return Ok(None);
    };
    TimeUnits::parse(units)
        .map(Some)
        .map_err(|e| GridError::access(uri, format!("time units cannot be parsed: {}", e)))
}

/// First time value as an absolute instant (milliseconds), for ordering.
fn first_time(uri: &str, info: &VariableInfo, units: Option<&TimeUnits>) -> GridResult<Option<i64>> {
    let Some(first) = info
        .axes
        .iter()
        .find(|a| a.kind.is_time())
        .and_then(|a| a.values.first().copied())
    else {
        return Ok(None);
    };
    Ok(Some(match units {
        Some(u) => u
            .to_datetime(first)
            .map_err(|e| GridError::access(uri, format!("time coordinate: {}", e)))?
            .timestamp_millis(),
        None => first.round() as i64,
    }))
}

fn clamp_indices(range: &AxisRange, len: usize) -> IndexSlice {
    let slice = range.to_index_slice().unwrap_or_else(|| IndexSlice::full(len));
    IndexSlice::new(slice.start.min(len), slice.stop.min(len), slice.step)
}

/// Local part of a global index range over concatenated sources.
fn local_slice(range: &AxisRange, offset: usize, len: usize) -> IndexSlice {
    let global = range
        .to_index_slice()
        .unwrap_or_else(|| IndexSlice::full(offset + len));
    let end = global.stop.min(offset + len);
    let mut begin = global.start.max(offset);
    // Keep the global stride phase
    let phase = (begin - global.start) % global.step;
    if phase != 0 {
        begin = begin.saturating_add(global.step - phase);
    }
    if begin >= end {
        return IndexSlice::new(0, 0, global.step);
    }
    IndexSlice::new(begin - offset, end - offset, global.step)
}

/// Indices whose coordinates fall in a value range (inclusive, with tolerance).
///
/// Works on ascending and descending axes. A point maps to its nearest
/// coordinate when it lies within the axis bounds.
fn map_values(coords: &[f64], range: &AxisRange, tol: f64) -> IndexSlice {
    let step = range.step.map(|s| s.round().max(1.0) as usize).unwrap_or(1);
    let empty = IndexSlice::new(0, 0, step);
    if coords.is_empty() {
        return empty;
    }

    match range.extent {
        Extent::Point(v) => {
            let lo = coords.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = coords.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if v < lo - tol || v > hi + tol {
                return empty;
            }
            let nearest = coords
                .iter()
                .enumerate()
                .min_by(|a, b| (a.1 - v).abs().total_cmp(&(b.1 - v).abs()))
                .map(|(i, _)| i)
                .unwrap_or(0);
            IndexSlice::new(nearest, nearest + 1, 1)
        }
        Extent::Span { start, end } => {
            let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
            let inside = |c: &f64| *c >= lo - tol && *c <= hi + tol;
            let Some(first) = coords.iter().position(inside) else {
                return empty;
            };
            let last = coords.iter().rposition(inside).unwrap_or(first);
            IndexSlice::new(first, last + 1, step)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAYS_2000: &str = "days since 2000-01-01 00:00:00";

    fn info(times: Vec<f64>, units: &str) -> VariableInfo {
        VariableInfo {
            name: "tas".into(),
            axes: vec![
                AxisCoords::new("time", times).with_units(units),
                AxisCoords::new("lat", (0..10).map(|i| -45.0 + 10.0 * i as f64).collect()),
                AxisCoords::new("lon", (0..36).map(|i| 10.0 * i as f64).collect()),
            ],
            units: Some("K".into()),
        }
    }

    fn days(start: usize, n: usize) -> Vec<f64> {
        (start..start + n).map(|d| d as f64).collect()
    }

    #[test]
    fn test_value_mapping() {
        let lat = AxisCoords::new("lat", vec![-20.0, -10.0, 0.0, 10.0, 20.0]);
        let mapper = DomainMapper::default();
        assert_eq!(mapper.map_axis(&lat, &AxisRange::values(-10.0, 10.0)), IndexSlice::new(1, 4, 1));
        assert_eq!(mapper.map_axis(&lat, &AxisRange::values(10.0, -10.0)), IndexSlice::new(1, 4, 1));
        assert_eq!(mapper.map_axis(&lat, &AxisRange::values(-9.9995, 9.9995)), IndexSlice::new(1, 4, 1));
        assert_eq!(mapper.map_axis(&lat, &AxisRange::values(-5.0, 5.0)), IndexSlice::new(2, 3, 1));
        assert!(mapper.map_axis(&lat, &AxisRange::values(30.0, 40.0)).is_empty());
        assert_eq!(
            mapper.map_axis(&lat, &AxisRange::values(-20.0, 20.0).with_step(2.0)),
            IndexSlice::new(0, 5, 2)
        );
    }

    #[test]
    fn test_descending_axis() {
        let lat = AxisCoords::new("lat", vec![90.0, 45.0, 0.0, -45.0, -90.0]);
        let slice = DomainMapper::default().map_axis(&lat, &AxisRange::values(-50.0, 50.0));
        assert_eq!(slice, IndexSlice::new(1, 4, 1));
    }

    #[test]
    fn test_point_maps_to_nearest() {
        let lon = AxisCoords::new("lon", vec![0.0, 2.5, 5.0, 7.5]);
        let mapper = DomainMapper::default();
        assert_eq!(mapper.map_axis(&lon, &AxisRange::point(3.0)), IndexSlice::new(1, 2, 1));
        assert_eq!(mapper.map_axis(&lon, &AxisRange::point(7.5)), IndexSlice::new(3, 4, 1));
        assert!(mapper.map_axis(&lon, &AxisRange::point(9.0)).is_empty());
    }

    #[test]
    fn test_index_ranges_are_clamped() {
        let lon = AxisCoords::new("lon", vec![0.0; 10]);
        let mapper = DomainMapper::default();
        assert_eq!(mapper.map_axis(&lon, &AxisRange::indices(4, 40)), IndexSlice::new(4, 10, 1));
        assert!(mapper.map_axis(&lon, &AxisRange::indices(12, 20)).is_empty());
    }

    #[test]
    fn test_sources_sorted_by_time() {
        let sources = vec![
            ("b".to_string(), info(days(10, 10), DAYS_2000)),
            ("a".to_string(), info(days(0, 10), DAYS_2000)),
        ];
        let mapped = DomainMapper::default().map(&sources, &Domain::new()).unwrap();
        let uris: Vec<&str> = mapped.selections.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(uris, vec!["a", "b"]);
        assert_eq!(mapped.selections[0].input, 1);
        assert_eq!(mapped.base_units.unwrap().to_string(), DAYS_2000);
    }

    #[test]
    fn test_global_time_indices() {
        let sources = vec![
            ("a".to_string(), info(days(0, 10), DAYS_2000)),
            ("b".to_string(), info(days(10, 10), DAYS_2000)),
            ("c".to_string(), info(days(20, 10), DAYS_2000)),
        ];
        let domain = Domain::new().with(AxisKind::Time, AxisRange::indices(5, 15));
        let mapped = DomainMapper::default().map(&sources, &domain).unwrap();

        let slices: Vec<IndexSlice> = mapped
            .selections
            .iter()
            .map(|s| s.time_slice().unwrap())
            .collect();
        assert_eq!(slices, vec![IndexSlice::new(5, 10, 1), IndexSlice::new(0, 5, 1)]);
        assert_eq!(mapped.dropped, vec!["c".to_string()]);
    }

    #[test]
    fn test_global_time_stride_keeps_phase() {
        let sources = vec![
            ("a".to_string(), info(days(0, 10), DAYS_2000)),
            ("b".to_string(), info(days(10, 10), DAYS_2000)),
        ];
        let domain = Domain::new().with(AxisKind::Time, AxisRange::indices(0, 20).with_step(3.0));
        let mapped = DomainMapper::default().map(&sources, &domain).unwrap();
        // Global 0,3,6,9 | 12,15,18 -> local 2,5,8 in the second source
        let b = mapped.selections[1].time_slice().unwrap();
        assert_eq!(b.indices().collect::<Vec<_>>(), vec![2, 5, 8]);
    }

    #[test]
    fn test_time_values_in_other_units() {
        // Second source counts hours since 2000-01-11
        let sources = vec![
            ("a".to_string(), info(days(0, 10), DAYS_2000)),
            (
                "b".to_string(),
                info((0..10).map(|d| d as f64 * 24.0).collect(), "hours since 2000-01-11"),
            ),
        ];
        // Days 8..=12 in base units
        let domain = Domain::new().with(AxisKind::Time, AxisRange::values(8.0, 12.0));
        let mapped = DomainMapper::default().map(&sources, &domain).unwrap();
        assert_eq!(mapped.selections[0].time_slice(), Some(IndexSlice::new(8, 10, 1)));
        assert_eq!(mapped.selections[1].time_slice(), Some(IndexSlice::new(0, 3, 1)));

        // Bounds given in their own units
        let domain = Domain::new().with(
            AxisKind::Time,
            AxisRange::values(0.0, 48.0).with_units("hours since 2000-01-10"),
        );
        let mapped = DomainMapper::default().map(&sources, &domain).unwrap();
        assert_eq!(mapped.selections[0].time_slice(), Some(IndexSlice::new(9, 10, 1)));
        assert_eq!(mapped.selections[1].time_slice(), Some(IndexSlice::new(0, 2, 1)));
    }

    #[test]
    fn test_time_bound_beyond_calendar_is_invalid_domain() {
        let sources = vec![("a".to_string(), info(vec![0.0, 1.0], "hours since 2000-01-01"))];
        let domain = Domain::new().with(
            AxisKind::Time,
            AxisRange::values(0.0, 1e15).with_units(DAYS_2000),
        );
        let err = DomainMapper::default().map(&sources, &domain).unwrap_err();
        assert!(matches!(err, GridError::InvalidDomain(_)), "{:?}", err);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_fill_value_in_time_axis_is_access_error() {
        let sources = vec![(
            "a".to_string(),
            info(vec![9.96921e36, 1.0], "hours since 2000-01-01"),
        )];
        let err = DomainMapper::default().map(&sources, &Domain::new()).unwrap_err();
        assert!(matches!(err, GridError::Access { .. }), "{:?}", err);
    }

    #[test]
    fn test_disjoint_domain_fails() {
        let sources = vec![("a".to_string(), info(days(0, 10), DAYS_2000))];
        let domain = Domain::new().with(AxisKind::Latitude, AxisRange::values(60.0, 80.0));
        let err = DomainMapper::default().map(&sources, &domain).unwrap_err();
        assert!(matches!(err, GridError::DomainMapping(_)));
    }

    #[test]
    fn test_spatial_shapes_must_agree() {
        let mut coarse = info(days(10, 10), DAYS_2000);
        coarse.axes[2] = AxisCoords::new("lon", (0..18).map(|i| 20.0 * i as f64).collect());
        let sources = vec![
            ("a".to_string(), info(days(0, 10), DAYS_2000)),
            ("b".to_string(), coarse),
        ];
        let err = DomainMapper::default().map(&sources, &Domain::new()).unwrap_err();
        assert!(matches!(err, GridError::ShapeMismatch(_)));
    }

    #[test]
    fn test_bad_time_units_is_access_error() {
        let sources = vec![("a".to_string(), info(days(0, 10), "fortnights after lunch"))];
        let err = DomainMapper::default().map(&sources, &Domain::new()).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_extent_and_remap_onto() {
        let sources = vec![("a".to_string(), info(days(0, 10), DAYS_2000))];
        let domain = Domain::new()
            .with(AxisKind::Time, AxisRange::indices(2, 6))
            .with(AxisKind::Latitude, AxisRange::values(-25.0, 15.0))
            .with(AxisKind::Longitude, AxisRange::point(100.0));
        let mapped = DomainMapper::default().map(&sources, &domain).unwrap();
        let selection = &mapped.selections[0];

        let extent = selection.extent();
        assert_eq!(extent.get(&AxisKind::Time), Some(&AxisRange::indices(2, 6)));
        assert_eq!(extent.get(&AxisKind::Latitude), Some(&AxisRange::values(-25.0, 15.0)));
        assert_eq!(extent.get(&AxisKind::Longitude), Some(&AxisRange::point(100.0)));

        // A cached copy of time 1..8, all latitudes and longitudes 90..=120
        let full = &info(days(0, 10), DAYS_2000).axes;
        let cached = vec![
            full[0].select(&IndexSlice::new(1, 8, 1)),
            full[1].clone(),
            full[2].select(&IndexSlice::new(9, 13, 1)),
        ];
        let slices = DomainMapper::default().remap_onto(selection, &cached).unwrap();
        assert_eq!(
            slices,
            vec![
                (AxisKind::Time, IndexSlice::new(1, 5, 1)),
                (AxisKind::Latitude, IndexSlice::new(2, 7, 1)),
                (AxisKind::Longitude, IndexSlice::new(1, 2, 1)),
            ]
        );

        // Latitudes missing from the cached copy
        let mut partial = cached.clone();
        partial[1] = full[1].select(&IndexSlice::new(3, 10, 1));
        assert!(DomainMapper::default().remap_onto(selection, &partial).is_none());
    }

    #[test]
    fn test_remap_time_to_base_units() {
        let sources = vec![(
            "a".to_string(),
            info(vec![0.0, 24.0], "hours since 2000-01-02"),
        )];
        let mapped = DomainMapper::default().map(&sources, &Domain::new()).unwrap();
        let selection = &mapped.selections[0];
        let mut chunk = GridChunk::new(
            "tas",
            selection.selected_axes(),
            vec![0.0; 2 * 10 * 36],
        )
        .unwrap();
        let base = TimeUnits::parse(DAYS_2000).unwrap();
        selection.remap_time(&mut chunk, Some(&base)).unwrap();
        let time = chunk.axis(&AxisKind::Time).unwrap();
        assert_eq!(time.values, vec![1.0, 2.0]);
        assert_eq!(time.units.as_deref(), Some(DAYS_2000));
    }
}
