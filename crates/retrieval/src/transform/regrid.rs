//! Regridding onto a regular latitude/longitude grid.

use grid_common::{AxisKind, Domain, GridError, GridResult, DEFAULT_TOLERANCE};
use grid_io::GridChunk;

use super::interpolation::{fractional_index, InterpolationMethod, Plane};
use super::ChunkTransform;
use crate::job::{GridTarget, GridderSpec};

/// Most points a target grid may have along one axis.
const MAX_AXIS_POINTS: usize = 1_000_000;

fn axis_points(kind: &str, count: f64) -> GridResult<usize> {
    if count > MAX_AXIS_POINTS as f64 {
        return Err(GridError::config(format!(
            "target grid has {:.0} {} points, at most {} allowed",
            count, kind, MAX_AXIS_POINTS
        )));
    }
    Ok(count as usize)
}

/// Target grid coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetGrid {
    /// Global grid: latitudes from 90 southward, longitudes from 0 eastward.
    Uniform { dlat: f64, dlon: f64 },
    /// Explicit coordinates.
    Explicit { lat: Vec<f64>, lon: Vec<f64> },
}

impl TargetGrid {
    /// Parse `uniform~<dlat>x<dlon>`.
    pub fn parse(s: &str) -> GridResult<Self> {
        let (kind, arg) = s
            .split_once('~')
            .ok_or_else(|| GridError::config(format!("grid '{}' is not of the form <type>~<arg>", s)))?;
        match kind {
            "uniform" => {
                let (dlat, dlon) = arg
                    .split_once('x')
                    .ok_or_else(|| GridError::config(format!("uniform grid '{}' needs <dlat>x<dlon>", arg)))?;
                let parse = |v: &str| {
                    v.trim()
                        .parse::<f64>()
                        .ok()
                        .filter(|d| d.is_finite() && *d > 0.0)
                        .ok_or_else(|| GridError::config(format!("invalid grid spacing '{}'", v)))
                };
                let (dlat, dlon) = (parse(dlat)?, parse(dlon)?);
                axis_points("latitude", (180.0 / dlat).round())?;
                axis_points("longitude", (360.0 / dlon).round())?;
                Ok(Self::Uniform { dlat, dlon })
            }
            other => Err(GridError::config(format!("unsupported grid type '{}'", other))),
        }
    }

    /// Grid spanned by the latitude and longitude ranges of a domain, using their steps.
    pub fn from_domain(domain: &Domain) -> GridResult<Self> {
        let axis = |kind: AxisKind| -> GridResult<Vec<f64>> {
            let range = domain
                .get(&kind)
                .ok_or_else(|| GridError::config(format!("grid domain needs a {} axis", kind)))?;
            if range.is_point() {
                return Ok(vec![range.start()]);
            }
            let step = range
                .step
                .ok_or_else(|| GridError::config(format!("grid domain {} axis needs a step", kind)))?;
            if !step.is_finite() || step <= 0.0 {
                return Err(GridError::config(format!("grid domain {} axis has invalid step {}", kind, step)));
            }
            let (start, end) = (range.start(), range.end());
            let count = axis_points(kind.name(), ((end - start).abs() / step + 1e-9).floor() + 1.0)?;
            let sign = if end >= start { 1.0 } else { -1.0 };
            Ok((0..count).map(|i| start + sign * step * i as f64).collect())
        };
        Ok(Self::Explicit {
            lat: axis(AxisKind::Latitude)?,
            lon: axis(AxisKind::Longitude)?,
        })
    }

    pub fn latitudes(&self) -> Vec<f64> {
        match self {
            Self::Uniform { dlat, .. } => {
                let n = (180.0 / dlat).round() as usize;
                (0..n).map(|i| 90.0 - dlat * i as f64).collect()
            }
            Self::Explicit { lat, .. } => lat.clone(),
        }
    }

    pub fn longitudes(&self) -> Vec<f64> {
        match self {
            Self::Uniform { dlon, .. } => {
                let n = (360.0 / dlon).round() as usize;
                (0..n).map(|i| dlon * i as f64).collect()
            }
            Self::Explicit { lon, .. } => lon.clone(),
        }
    }
}

/// Interpolates the latitude/longitude plane of every chunk onto a target grid.
///
/// Only target points inside the chunk's own coordinate bounds are produced,
/// so spatially tiled chunks never overlap. Longitudes do not wrap.
#[derive(Debug, Clone)]
pub struct RegridTransform {
    method: InterpolationMethod,
    lats: Vec<f64>,
    lons: Vec<f64>,
    tolerance: f64,
}

impl RegridTransform {
    pub fn new(method: InterpolationMethod, grid: &TargetGrid) -> Self {
        Self {
            method,
            lats: grid.latitudes(),
            lons: grid.longitudes(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn from_spec(spec: &GridderSpec) -> GridResult<Self> {
        let method = InterpolationMethod::parse(&spec.method)?;
        let grid = match &spec.grid {
            GridTarget::Named(name) => TargetGrid::parse(name)?,
            GridTarget::Bounds(domain) => TargetGrid::from_domain(domain)?,
        };
        Ok(Self::new(method, &grid))
    }
}

impl ChunkTransform for RegridTransform {
    fn name(&self) -> &str {
        "regrid"
    }

    fn apply(&self, chunk: &GridChunk) -> GridResult<GridChunk> {
        let (Some(ilat), Some(ilon)) = (
            chunk.axis_index(&AxisKind::Latitude),
            chunk.axis_index(&AxisKind::Longitude),
        ) else {
            return Err(GridError::shape_mismatch(
                "regrid needs latitude and longitude axes",
            ));
        };

        let targets = |wanted: &[f64], coords: &[f64]| -> Vec<(f64, f64)> {
            wanted
                .iter()
                .filter_map(|&v| fractional_index(coords, v, self.tolerance).map(|f| (v, f)))
                .collect()
        };
        let t_lat = targets(&self.lats, &chunk.axes[ilat].values);
        let t_lon = targets(&self.lons, &chunk.axes[ilon].values);

        let shape = chunk.shape();
        let mut out_shape = shape.clone();
        out_shape[ilat] = t_lat.len();
        out_shape[ilon] = t_lon.len();
        if t_lat.is_empty() || t_lon.is_empty() {
            return Err(GridError::InvalidShape { shape: out_shape });
        }

        let strides = row_major_strides(&shape);
        let out_strides = row_major_strides(&out_shape);
        let outer: Vec<usize> = (0..shape.len()).filter(|&d| d != ilat && d != ilon).collect();
        let outer_total: usize = outer.iter().map(|&d| shape[d]).product();

        let (n_lat, n_lon) = (shape[ilat], shape[ilon]);
        let mut plane = vec![0.0f32; n_lat * n_lon];
        let mut out = vec![f32::NAN; out_shape.iter().product()];
        let mut idx = vec![0usize; outer.len()];

        for _ in 0..outer_total {
            let base_in: usize = outer.iter().zip(&idx).map(|(&d, &i)| i * strides[d]).sum();
            let base_out: usize = outer.iter().zip(&idx).map(|(&d, &i)| i * out_strides[d]).sum();

            for i in 0..n_lat {
                for j in 0..n_lon {
                    plane[i * n_lon + j] = chunk.data[base_in + i * strides[ilat] + j * strides[ilon]];
                }
            }
            let view = Plane {
                data: &plane,
                rows: n_lat,
                cols: n_lon,
            };
            for (oi, (_, row)) in t_lat.iter().enumerate() {
                for (oj, (_, col)) in t_lon.iter().enumerate() {
                    out[base_out + oi * out_strides[ilat] + oj * out_strides[ilon]] =
                        view.sample(self.method, *row, *col);
                }
            }

            for k in (0..outer.len()).rev() {
                idx[k] += 1;
                if idx[k] < shape[outer[k]] {
                    break;
                }
                idx[k] = 0;
            }
        }

        let mut axes = chunk.axes.clone();
        axes[ilat].values = t_lat.iter().map(|(v, _)| *v).collect();
        axes[ilon].values = t_lon.iter().map(|(v, _)| *v).collect();

        Ok(GridChunk::new(&chunk.variable, axes, out)?.with_units(chunk.units.clone()))
    }
}

fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_common::AxisRange;
    use grid_io::AxisCoords;
    use test_utils::assert_values_approx_eq;

    fn field(lats: Vec<f64>, lons: Vec<f64>, times: usize) -> GridChunk {
        // value = lat + lon / 1000 + 100 * t, linear in both directions
        let mut data = Vec::new();
        for t in 0..times {
            for lat in &lats {
                for lon in &lons {
                    data.push((lat + lon / 1000.0 + 100.0 * t as f64) as f32);
                }
            }
        }
        GridChunk::new(
            "tas",
            vec![
                AxisCoords::new("time", (0..times).map(|t| t as f64).collect()),
                AxisCoords::new("lat", lats),
                AxisCoords::new("lon", lons),
            ],
            data,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_uniform() {
        let grid = TargetGrid::parse("uniform~2x2.5").unwrap();
        assert_eq!(grid, TargetGrid::Uniform { dlat: 2.0, dlon: 2.5 });
        let lats = grid.latitudes();
        assert_eq!(lats.len(), 90);
        assert_eq!(lats[0], 90.0);
        assert_eq!(lats[89], -88.0);
        assert_eq!(grid.longitudes().len(), 144);

        assert!(TargetGrid::parse("gaussian~32").is_err());
        assert!(TargetGrid::parse("uniform~0x2").is_err());
        assert!(TargetGrid::parse("uniform").is_err());
    }

    #[test]
    fn test_grid_from_domain() {
        let domain = Domain::new()
            .with(AxisKind::Latitude, AxisRange::values(10.0, 0.0).with_step(5.0))
            .with(AxisKind::Longitude, AxisRange::values(0.0, 3.0).with_step(1.5));
        let grid = TargetGrid::from_domain(&domain).unwrap();
        assert_eq!(grid.latitudes(), vec![10.0, 5.0, 0.0]);
        assert_eq!(grid.longitudes(), vec![0.0, 1.5, 3.0]);

        let no_step = Domain::new()
            .with(AxisKind::Latitude, AxisRange::values(0.0, 10.0))
            .with(AxisKind::Longitude, AxisRange::values(0.0, 3.0));
        assert!(TargetGrid::from_domain(&no_step).is_err());
    }

    #[test]
    fn test_degenerate_steps_rejected() {
        let grid_with_lat_step = |step: f64| {
            let domain = Domain::new()
                .with(AxisKind::Latitude, AxisRange::values(0.0, 10.0).with_step(step))
                .with(AxisKind::Longitude, AxisRange::point(0.0));
            TargetGrid::from_domain(&domain)
        };
        for step in [0.0, -1.0, f64::NAN, 1e-12] {
            let err = grid_with_lat_step(step).unwrap_err();
            assert!(matches!(err, GridError::Config(_)), "step {}: {:?}", step, err);
        }
        assert_eq!(grid_with_lat_step(2.5).unwrap().latitudes().len(), 5);

        assert!(TargetGrid::parse("uniform~1e-9x1").is_err());
    }

    #[test]
    fn test_bilinear_regrid_of_linear_field() {
        let input = field(vec![0.0, 2.0, 4.0], vec![0.0, 2.0, 4.0], 2);
        let grid = TargetGrid::Explicit {
            lat: vec![3.0, 1.0],
            lon: vec![1.0, 3.0, 9.0],
        };
        let out = RegridTransform::new(InterpolationMethod::Bilinear, &grid)
            .apply(&input)
            .unwrap();
        // lon 9 is outside the chunk and is not produced
        assert_eq!(out.shape(), vec![2, 2, 2]);
        assert_eq!(out.axis(&AxisKind::Latitude).unwrap().values, vec![3.0, 1.0]);
        assert_eq!(out.axis(&AxisKind::Longitude).unwrap().values, vec![1.0, 3.0]);
        let expected = [3.001, 3.003, 1.001, 1.003, 103.001, 103.003, 101.001, 101.003];
        assert_values_approx_eq!(out.data, expected, 1e-3);
    }

    #[test]
    fn test_nearest_on_same_grid_is_identity() {
        let input = field(vec![10.0, 0.0, -10.0], vec![0.0, 10.0], 1);
        let grid = TargetGrid::Explicit {
            lat: vec![10.0, 0.0, -10.0],
            lon: vec![0.0, 10.0],
        };
        let out = RegridTransform::new(InterpolationMethod::Nearest, &grid)
            .apply(&input)
            .unwrap();
        assert_eq!(out.data, input.data);
    }

    #[test]
    fn test_longitude_before_latitude() {
        let input = GridChunk::new(
            "tas",
            vec![
                AxisCoords::new("lon", vec![0.0, 2.0]),
                AxisCoords::new("lat", vec![0.0, 2.0]),
            ],
            // [lon][lat]
            vec![0.0, 2.0, 20.0, 22.0],
        )
        .unwrap();
        let grid = TargetGrid::Explicit {
            lat: vec![1.0],
            lon: vec![0.0, 2.0],
        };
        let out = RegridTransform::new(InterpolationMethod::Bilinear, &grid)
            .apply(&input)
            .unwrap();
        assert_eq!(out.shape(), vec![2, 1]);
        assert_eq!(out.data, vec![1.0, 21.0]);
    }

    #[test]
    fn test_errors() {
        let grid = TargetGrid::Explicit {
            lat: vec![50.0],
            lon: vec![50.0],
        };
        let input = field(vec![0.0, 1.0], vec![0.0, 1.0], 1);
        let err = RegridTransform::new(InterpolationMethod::Bilinear, &grid)
            .apply(&input)
            .unwrap_err();
        assert!(matches!(err, GridError::InvalidShape { .. }));

        let no_lon = GridChunk::new("tas", vec![AxisCoords::new("lat", vec![0.0])], vec![1.0]).unwrap();
        let err = RegridTransform::new(InterpolationMethod::Bilinear, &grid)
            .apply(&no_lon)
            .unwrap_err();
        assert!(matches!(err, GridError::ShapeMismatch(_)));
    }
}
