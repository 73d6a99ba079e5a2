//! In-memory block of gridded data.

use grid_common::{AxisKind, GridError, GridResult, IndexSlice};

/// Coordinates of one axis of a chunk or dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisCoords {
    /// Name as found in the dataset (`latitude`, `plev`, ...).
    pub name: String,
    pub kind: AxisKind,
    pub values: Vec<f64>,
    pub units: Option<String>,
}

impl AxisCoords {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        let name = name.into();
        Self {
            kind: AxisKind::from_name(&name),
            name,
            values,
            units: None,
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Coordinates selected by an index slice.
    pub fn select(&self, slice: &IndexSlice) -> AxisCoords {
        let values = slice
            .indices()
            .take_while(|&i| i < self.values.len())
            .map(|i| self.values[i])
            .collect();
        AxisCoords {
            name: self.name.clone(),
            kind: self.kind.clone(),
            values,
            units: self.units.clone(),
        }
    }
}

/// Row-major block of one variable with the coordinates of every axis.
#[derive(Debug, Clone, PartialEq)]
pub struct GridChunk {
    pub variable: String,
    pub axes: Vec<AxisCoords>,
    pub data: Vec<f32>,
    /// Units of the data values.
    pub units: Option<String>,
}

impl GridChunk {
    pub fn new(variable: impl Into<String>, axes: Vec<AxisCoords>, data: Vec<f32>) -> GridResult<Self> {
        let expected: usize = axes.iter().map(AxisCoords::len).product();
        if expected != data.len() {
            return Err(GridError::shape_mismatch(format!(
                "chunk shape {:?} holds {} values, got {}",
                axes.iter().map(AxisCoords::len).collect::<Vec<_>>(),
                expected,
                data.len()
            )));
        }
        Ok(Self {
            variable: variable.into(),
            axes,
            data,
            units: None,
        })
    }

    pub fn with_units(mut self, units: Option<String>) -> Self {
        self.units = units;
        self
    }

    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(AxisCoords::len).collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn axis_index(&self, kind: &AxisKind) -> Option<usize> {
        self.axes.iter().position(|a| &a.kind == kind)
    }

    pub fn axis(&self, kind: &AxisKind) -> Option<&AxisCoords> {
        self.axes.iter().find(|a| &a.kind == kind)
    }

    pub fn axis_mut(&mut self, kind: &AxisKind) -> Option<&mut AxisCoords> {
        self.axes.iter_mut().find(|a| &a.kind == kind)
    }

    /// Reject chunks with a zero-length axis.
    pub fn ensure_non_empty(&self) -> GridResult<()> {
        let shape = self.shape();
        if shape.iter().any(|&n| n == 0) {
            return Err(GridError::InvalidShape { shape });
        }
        Ok(())
    }

    /// Join chunks end to end along one axis.
    ///
    /// All other axes must have the same lengths.
    pub fn concat(mut chunks: Vec<GridChunk>, kind: &AxisKind) -> GridResult<GridChunk> {
        if chunks.len() == 1 {
            return Ok(chunks.remove(0));
        }
        let first = chunks
            .first()
            .ok_or_else(|| GridError::internal("nothing to concatenate"))?;
        let axis = first.axis_index(kind).ok_or_else(|| {
            GridError::shape_mismatch(format!("cannot concatenate along missing axis {}", kind))
        })?;
        let base_shape = first.shape();

        for chunk in &chunks[1..] {
            let shape = chunk.shape();
            let compatible = shape.len() == base_shape.len()
                && chunk.axis_index(kind) == Some(axis)
                && shape
                    .iter()
                    .zip(&base_shape)
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            if !compatible {
                return Err(GridError::shape_mismatch(format!(
                    "{:?} vs {:?} along {}",
                    base_shape, shape, kind
                )));
            }
        }

        let outer: usize = base_shape[..axis].iter().product();
        let inner: usize = base_shape[axis + 1..].iter().product();
        let total: usize = chunks.iter().map(GridChunk::len).sum();

        let mut data = Vec::with_capacity(total);
        for o in 0..outer {
            for chunk in &chunks {
                let block = chunk.axes[axis].len() * inner;
                data.extend_from_slice(&chunk.data[o * block..(o + 1) * block]);
            }
        }

        let mut axes = first.axes.clone();
        axes[axis].values = chunks
            .iter()
            .flat_map(|c| c.axes[axis].values.iter().copied())
            .collect();

        Ok(GridChunk {
            variable: first.variable.clone(),
            axes,
            data,
            units: first.units.clone(),
        })
    }
}
