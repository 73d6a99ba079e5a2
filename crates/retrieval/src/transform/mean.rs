//! NaN-aware average over one or more axes.

use grid_common::{AxisKind, GridError, GridResult};
use grid_io::GridChunk;

use super::ChunkTransform;

/// Averages over `axes`, dropping them from the chunk.
///
/// NaNs are skipped; a cell whose inputs are all NaN stays NaN. Axes the
/// chunk does not have are ignored.
#[derive(Debug, Clone)]
pub struct MeanTransform {
    axes: Vec<AxisKind>,
}

impl MeanTransform {
    pub fn new(axes: Vec<AxisKind>) -> GridResult<Self> {
        if axes.is_empty() {
            return Err(GridError::config("mean needs at least one axis"));
        }
        Ok(Self { axes })
    }
}

impl ChunkTransform for MeanTransform {
    fn name(&self) -> &str {
        "mean"
    }

    fn apply(&self, chunk: &GridChunk) -> GridResult<GridChunk> {
        let reduced: Vec<bool> = chunk
            .axes
            .iter()
            .map(|a| self.axes.contains(&a.kind))
            .collect();
        if !reduced.iter().any(|&r| r) {
            return Ok(chunk.clone());
        }

        let shape = chunk.shape();
        let kept_axes: Vec<_> = chunk
            .axes
            .iter()
            .zip(&reduced)
            .filter(|(_, &r)| !r)
            .map(|(a, _)| a.clone())
            .collect();
        let out_len: usize = kept_axes.iter().map(|a| a.len()).product();

        // Output stride of every input axis; zero for reduced axes
        let mut out_strides = vec![0usize; shape.len()];
        let mut stride = 1;
        for d in (0..shape.len()).rev() {
            if !reduced[d] {
                out_strides[d] = stride;
                stride *= shape[d];
            }
        }

        let mut sums = vec![0.0f64; out_len];
        let mut counts = vec![0u32; out_len];
        let mut idx = vec![0usize; shape.len()];
        for &value in &chunk.data {
            if !value.is_nan() {
                let o: usize = idx.iter().zip(&out_strides).map(|(i, s)| i * s).sum();
                sums[o] += value as f64;
                counts[o] += 1;
            }
            for d in (0..shape.len()).rev() {
                idx[d] += 1;
                if idx[d] < shape[d] {
                    break;
                }
                idx[d] = 0;
            }
        }

        let data = sums
            .into_iter()
            .zip(counts)
            .map(|(s, n)| if n == 0 { f32::NAN } else { (s / n as f64) as f32 })
            .collect();

        Ok(GridChunk::new(&chunk.variable, kept_axes, data)?.with_units(chunk.units.clone()))
    }
}
