//! Sampling a 2-D plane at fractional index positions.
//!
//! Positions are `(row, col)` in index units of the source plane; anything
//! outside `[0, len - 1]` on either axis samples as NaN.

use grid_common::{GridError, GridResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationMethod {
    /// Nearest neighbor (preserves exact values).
    Nearest,
    /// Bilinear interpolation (smooth, slight value changes).
    #[default]
    Bilinear,
    /// Catmull-Rom bicubic interpolation.
    Cubic,
}

impl InterpolationMethod {
    /// Parse a method name (case-insensitive).
    pub fn parse(s: &str) -> GridResult<Self> {
        match s.to_lowercase().as_str() {
            "nearest" | "nearestneighbor" => Ok(Self::Nearest),
            "linear" | "bilinear" => Ok(Self::Bilinear),
            "cubic" | "bicubic" => Ok(Self::Cubic),
            other => Err(GridError::config(format!("unknown interpolation method '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
            Self::Cubic => "cubic",
        }
    }
}

/// Row-major 2-D view.
pub(crate) struct Plane<'a> {
    pub data: &'a [f32],
    pub rows: usize,
    pub cols: usize,
}

impl Plane<'_> {
    fn at(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    fn inside(&self, row: f64, col: f64) -> bool {
        row >= 0.0 && col >= 0.0 && row <= (self.rows - 1) as f64 && col <= (self.cols - 1) as f64
    }

    pub fn sample(&self, method: InterpolationMethod, row: f64, col: f64) -> f32 {
        if self.rows == 0 || self.cols == 0 || !row.is_finite() || !col.is_finite() || !self.inside(row, col) {
            return f32::NAN;
        }
        match method {
            InterpolationMethod::Nearest => self.nearest(row, col),
            InterpolationMethod::Bilinear => self.bilinear(row, col),
            InterpolationMethod::Cubic => self.cubic(row, col),
        }
    }

    fn nearest(&self, row: f64, col: f64) -> f32 {
        self.at(row.round() as usize, col.round() as usize)
    }

    fn bilinear(&self, row: f64, col: f64) -> f32 {
        let r0 = row.floor() as usize;
        let c0 = col.floor() as usize;
        let r1 = (r0 + 1).min(self.rows - 1);
        let c1 = (c0 + 1).min(self.cols - 1);
        let rf = (row - r0 as f64) as f32;
        let cf = (col - c0 as f64) as f32;

        let v00 = self.at(r0, c0);
        let v01 = self.at(r0, c1);
        let v10 = self.at(r1, c0);
        let v11 = self.at(r1, c1);
        if v00.is_nan() || v01.is_nan() || v10.is_nan() || v11.is_nan() {
            return f32::NAN;
        }

        let top = v00 * (1.0 - cf) + v01 * cf;
        let bottom = v10 * (1.0 - cf) + v11 * cf;
        top * (1.0 - rf) + bottom * rf
    }

    fn cubic(&self, row: f64, col: f64) -> f32 {
        let ri = row.floor() as i64;
        let ci = col.floor() as i64;
        let rf = (row - ri as f64) as f32;
        let cf = (col - ci as f64) as f32;

        let mut rows = [0.0f32; 4];
        for (j, out) in rows.iter_mut().enumerate() {
            let r = (ri + j as i64 - 1).clamp(0, self.rows as i64 - 1) as usize;
            let mut p = [0.0f32; 4];
            for (i, v) in p.iter_mut().enumerate() {
                let c = (ci + i as i64 - 1).clamp(0, self.cols as i64 - 1) as usize;
                *v = self.at(r, c);
                if v.is_nan() {
                    return self.bilinear(row, col);
                }
            }
            *out = catmull_rom(p, cf);
        }
        catmull_rom(rows, rf)
    }
}

fn catmull_rom(p: [f32; 4], t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;
    let a = -0.5 * p[0] + 1.5 * p[1] - 1.5 * p[2] + 0.5 * p[3];
    let b = p[0] - 2.5 * p[1] + 2.0 * p[2] - 0.5 * p[3];
    let c = -0.5 * p[0] + 0.5 * p[2];
    a * t3 + b * t2 + c * t + p[1]
}

/// Fractional index of `value` on a monotonic coordinate axis.
///
/// Returns `None` outside the axis (beyond `tol`).
pub(crate) fn fractional_index(coords: &[f64], value: f64, tol: f64) -> Option<f64> {
    match coords.len() {
        0 => None,
        1 => ((coords[0] - value).abs() <= tol).then_some(0.0),
        n => {
            let ascending = coords[n - 1] >= coords[0];
            let (lo, hi) = if ascending {
                (coords[0], coords[n - 1])
            } else {
                (coords[n - 1], coords[0])
            };
            if value < lo - tol || value > hi + tol {
                return None;
            }
            let value = value.clamp(lo, hi);
            for i in 0..n - 1 {
                let (a, b) = (coords[i], coords[i + 1]);
                let within = if ascending {
                    value >= a && value <= b
                } else {
                    value <= a && value >= b
                };
                if within {
                    let width = b - a;
                    let frac = if width == 0.0 { 0.0 } else { (value - a) / width };
                    return Some(i as f64 + frac);
                }
            }
            None
        }
    }
}
