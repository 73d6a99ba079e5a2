//! Source dataset access.

use std::sync::Arc;

use async_trait::async_trait;
use grid_common::IndexSlice;
use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs::storage::ReadableStorageTraits;

use crate::chunk::{AxisCoords, GridChunk};
use crate::dataset::DatasetAttributes;
use crate::error::{GridIoError, Result};

/// Native description of a variable: its axes with full coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    pub name: String,
    pub axes: Vec<AxisCoords>,
    pub units: Option<String>,
}

impl VariableInfo {
    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(AxisCoords::len).collect()
    }
}

/// An opened dataset.
///
/// Handles are released by dropping them.
pub trait SourceHandle: Send + Sync {
    fn uri(&self) -> &str;

    /// Axes and coordinates of a variable.
    fn variable(&self, name: &str) -> Result<VariableInfo>;

    /// Read an index-space selection, one slice per axis in array order.
    fn read(&self, variable: &str, selection: &[IndexSlice]) -> Result<GridChunk>;
}

/// Opens datasets by URI.
#[async_trait]
pub trait SourceAccessor: Send + Sync {
    async fn open(&self, uri: &str) -> Result<Box<dyn SourceHandle>>;
}

/// Dataset backed by a Zarr V3 array.
pub struct ZarrSource<S: ReadableStorageTraits + ?Sized> {
    uri: String,
    array: Array<S>,
    info: VariableInfo,
}

impl<S: ReadableStorageTraits + Send + Sync + 'static> ZarrSource<S> {
    /// Open the array at `path` inside `storage`.
    pub fn open(storage: Arc<S>, path: &str, uri: impl Into<String>) -> Result<Self> {
        let uri = uri.into();
        let array = Array::open(storage, path).map_err(|e| GridIoError::open_failed(&uri, e))?;

        let attrs = DatasetAttributes::from_json(&uri, array.attributes())?;
        let axes = attrs.axes(&uri, array.shape())?;

        tracing::debug!(
            uri = %uri,
            variable = %attrs.variable,
            shape = ?array.shape(),
            "Opened Zarr dataset"
        );

        Ok(Self {
            info: VariableInfo {
                name: attrs.variable.clone(),
                axes,
                units: attrs.variable_units(),
            },
            uri,
            array,
        })
    }

    fn check_selection(&self, selection: &[IndexSlice]) -> Result<()> {
        if selection.len() != self.info.axes.len() {
            return Err(GridIoError::Shape(format!(
                "{} slices for a {}-dimensional variable",
                selection.len(),
                self.info.axes.len()
            )));
        }
        for (slice, axis) in selection.iter().zip(&self.info.axes) {
            if !slice.is_empty() && slice.stop > axis.len() {
                return Err(GridIoError::Shape(format!(
                    "slice {} exceeds axis '{}' of length {}",
                    slice,
                    axis.name,
                    axis.len()
                )));
            }
        }
        Ok(())
    }
}

impl<S: ReadableStorageTraits + Send + Sync + 'static> SourceHandle for ZarrSource<S> {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn variable(&self, name: &str) -> Result<VariableInfo> {
        if name != self.info.name {
            return Err(GridIoError::UnknownVariable {
                uri: self.uri.clone(),
                variable: name.to_string(),
            });
        }
        Ok(self.info.clone())
    }

    fn read(&self, variable: &str, selection: &[IndexSlice]) -> Result<GridChunk> {
        let info = self.variable(variable)?;
        self.check_selection(selection)?;

        let axes: Vec<AxisCoords> = info
            .axes
            .iter()
            .zip(selection)
            .map(|(axis, slice)| axis.select(slice))
            .collect();

        // Nothing to fetch; the caller decides whether an empty chunk is an error
        if selection.iter().any(IndexSlice::is_empty) {
            return GridChunk::new(variable, axes, Vec::new())
                .map(|c| c.with_units(info.units.clone()))
                .map_err(|e| GridIoError::read_failed(&self.uri, e));
        }

        // Fetch the bounding box of the selection, then apply the strides
        let span: Vec<usize> = selection
            .iter()
            .map(|s| (s.len() - 1) * s.step + 1)
            .collect();
        let subset = ArraySubset::new_with_start_shape(
            selection.iter().map(|s| s.start as u64).collect(),
            span.iter().map(|&n| n as u64).collect(),
        )
        .map_err(|e| GridIoError::read_failed(&self.uri, e))?;

        let raw: Vec<f32> = self
            .array
            .retrieve_array_subset_elements(&subset)
            .map_err(|e| GridIoError::read_failed(&self.uri, e))?;

        let data = if selection.iter().all(|s| s.step == 1) {
            raw
        } else {
            let steps: Vec<usize> = selection.iter().map(|s| s.step).collect();
            let out_shape: Vec<usize> = selection.iter().map(IndexSlice::len).collect();
            gather_strided(&raw, &span, &steps, &out_shape)
        };

        tracing::trace!(
            uri = %self.uri,
            selection = ?selection.iter().map(ToString::to_string).collect::<Vec<_>>(),
            values = data.len(),
            "Read selection"
        );

        GridChunk::new(variable, axes, data)
            .map(|c| c.with_units(info.units))
            .map_err(|e| GridIoError::read_failed(&self.uri, e))
    }
}

/// Pick every `steps[d]`-th element along each axis of a row-major block.
fn gather_strided(data: &[f32], shape: &[usize], steps: &[usize], out_shape: &[usize]) -> Vec<f32> {
    let ndim = shape.len();
    let mut strides = vec![1usize; ndim];
    for d in (0..ndim.saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }

    let total: usize = out_shape.iter().product();
    let mut out = Vec::with_capacity(total);
    let mut idx = vec![0usize; ndim];
    for _ in 0..total {
        let offset: usize = (0..ndim).map(|d| idx[d] * steps[d] * strides[d]).sum();
        out.push(data[offset]);

        for d in (0..ndim).rev() {
            idx[d] += 1;
            if idx[d] < out_shape[d] {
                break;
            }
            idx[d] = 0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_strided_2d() {
        // 3 x 4 block with value = row * 10 + col
        let data: Vec<f32> = (0..3)
            .flat_map(|r| (0..4).map(move |c| (r * 10 + c) as f32))
            .collect();
        let out = gather_strided(&data, &[3, 4], &[2, 3], &[2, 2]);
        assert_eq!(out, vec![0.0, 3.0, 20.0, 23.0]);
    }

    #[test]
    fn test_gather_strided_identity() {
        let data = vec![1.0, 2.0, 3.0];
        assert_eq!(gather_strided(&data, &[3], &[1], &[3]), data);
    }
}
