//! Splitting a source selection into bounded chunks along one axis.

use grid_common::{AxisKind, GridError, GridResult, IndexSlice};

/// Which axis a plan tiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionStrategy {
    /// Tile the time axis in blocks of the configured length.
    Temporal,
    /// Tile the first non-time axis not listed in `skip`, in fixed steps.
    Spatial { skip: Vec<AxisKind> },
}

/// One chunk: the selection with the tiled axis narrowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpec {
    pub index: usize,
    pub slices: Vec<(AxisKind, IndexSlice)>,
}

impl ChunkSpec {
    pub fn slice(&self, kind: &AxisKind) -> Option<&IndexSlice> {
        self.slices.iter().find(|(k, _)| k == kind).map(|(_, s)| s)
    }

    /// Slices in array order, without axis kinds.
    pub fn selection(&self) -> Vec<IndexSlice> {
        self.slices.iter().map(|(_, s)| *s).collect()
    }
}

/// Ordered, gap-free, non-overlapping chunks covering a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    /// Tiled axis; `None` when the selection lacks it and is a single chunk.
    pub axis: Option<AxisKind>,
    pub chunks: Vec<ChunkSpec>,
}

impl PartitionPlan {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Splits selections into chunks of bounded extent.
#[derive(Debug, Clone, Copy)]
pub struct PartitionPlanner {
    spatial_step: usize,
    time_block_len: usize,
}

impl Default for PartitionPlanner {
    fn default() -> Self {
        Self::new(20, 10)
    }
}

impl PartitionPlanner {
    pub fn new(spatial_step: usize, time_block_len: usize) -> Self {
        Self {
            spatial_step: spatial_step.max(1),
            time_block_len: time_block_len.max(1),
        }
    }

    /// Plan the chunks of `selection` (slices in array order).
    pub fn plan(
        &self,
        selection: &[(AxisKind, IndexSlice)],
        strategy: &PartitionStrategy,
    ) -> GridResult<PartitionPlan> {
        let (position, block) = match strategy {
            PartitionStrategy::Temporal => (
                selection.iter().position(|(k, _)| k.is_time()),
                self.time_block_len,
            ),
            PartitionStrategy::Spatial { skip } => (
                selection
                    .iter()
                    .position(|(k, _)| !k.is_time() && !skip.contains(k)),
                self.spatial_step,
            ),
        };

        let Some(position) = position else {
            return Ok(PartitionPlan {
                axis: None,
                chunks: vec![ChunkSpec {
                    index: 0,
                    slices: selection.to_vec(),
                }],
            });
        };

        let (kind, slice) = &selection[position];
        if slice.is_empty() {
            return Err(GridError::InvalidShape {
                shape: selection.iter().map(|(_, s)| s.len()).collect(),
            });
        }

        let chunks = split(slice, block)
            .into_iter()
            .enumerate()
            .map(|(index, part)| {
                let mut slices = selection.to_vec();
                slices[position].1 = part;
                ChunkSpec { index, slices }
            })
            .collect();

        Ok(PartitionPlan {
            axis: Some(kind.clone()),
            chunks,
        })
    }
}

/// Cut `slice` into consecutive pieces of at most `block` index units.
///
/// The block is rounded down to a multiple of the slice's step (at least one
/// step) so every piece starts on a selected index.
fn split(slice: &IndexSlice, block: usize) -> Vec<IndexSlice> {
    let span = (block / slice.step).max(1) * slice.step;
    let mut parts = Vec::new();
    let mut begin = slice.start;
    while begin < slice.stop {
        let end = begin.saturating_add(span).min(slice.stop);
        parts.push(IndexSlice::new(begin, end, slice.step));
        begin = end;
    }
    parts
}
