//! Streaming Zarr V3 writer.
//!
//! Chunks are appended one at a time along a single axis. The array
//! metadata (`zarr.json`) is only stored by [`ZarrGridWriter::finish`], so an
//! interrupted write never leaves a readable dataset behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use grid_common::AxisKind;
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use crate::chunk::{AxisCoords, GridChunk};
use crate::config::{ZarrCompression, ZarrWriteOptions};
use crate::dataset::DatasetAttributes;
use crate::error::{GridIoError, Result};

/// Summary of a finished dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenDataset {
    pub path: PathBuf,
    pub shape: Vec<usize>,
    pub size_bytes: u64,
}

/// Layout fixed by the first appended chunk.
struct Layout {
    variable: String,
    units: Option<String>,
    axes: Vec<AxisCoords>,
    concat: Option<usize>,
    chunk_shape: Vec<u64>,
    appended: usize,
}

impl Layout {
    fn shape(&self) -> Vec<u64> {
        self.axes.iter().map(|a| a.len() as u64).collect()
    }
}

/// Writes a dataset chunk by chunk along one axis.
pub struct ZarrGridWriter {
    path: PathBuf,
    concat_axis: AxisKind,
    options: ZarrWriteOptions,
    store: Arc<FilesystemStore>,
    layout: Option<Layout>,
}

impl ZarrGridWriter {
    /// Start a new dataset at `path`, replacing anything already there.
    pub fn create(
        path: impl Into<PathBuf>,
        concat_axis: AxisKind,
        options: ZarrWriteOptions,
    ) -> Result<Self> {
        let path = path.into();
        let display = path.display().to_string();
        if path.exists() {
            std::fs::remove_dir_all(&path).map_err(|e| GridIoError::write_failed(&display, e))?;
        }
        std::fs::create_dir_all(&path).map_err(|e| GridIoError::write_failed(&display, e))?;
        let store = FilesystemStore::new(&path).map_err(|e| GridIoError::write_failed(&display, e))?;

        Ok(Self {
            path,
            concat_axis,
            options,
            store: Arc::new(store),
            layout: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of chunks appended so far.
    pub fn chunks_written(&self) -> usize {
        self.layout.as_ref().map(|l| l.appended).unwrap_or(0)
    }

    /// Append a chunk after everything written so far.
    ///
    /// Every axis other than the concatenation axis must keep the length of
    /// the first chunk. A chunk without the concatenation axis can only be
    /// written once.
    pub fn append(&mut self, chunk: &GridChunk) -> Result<()> {
        let shape = chunk.shape();
        if shape.iter().any(|&n| n == 0) {
            return Err(GridIoError::Shape(format!(
                "cannot write empty chunk of shape {:?}",
                shape
            )));
        }

        let offset = match self.layout.as_mut() {
            None => {
                self.layout = Some(Layout {
                    variable: chunk.variable.clone(),
                    units: chunk.units.clone(),
                    axes: chunk.axes.clone(),
                    concat: chunk.axis_index(&self.concat_axis),
                    chunk_shape: shape.iter().map(|&n| n as u64).collect(),
                    appended: 0,
                });
                0
            }
            Some(layout) => {
                Self::check_compatible(layout, chunk, &self.concat_axis)?;
                let Some(axis) = layout.concat else {
                    return Err(GridIoError::Shape(format!(
                        "dataset has no '{}' axis to append along",
                        self.concat_axis
                    )));
                };
                let offset = layout.axes[axis].len();
                layout.axes[axis]
                    .values
                    .extend_from_slice(&chunk.axes[axis].values);
                offset
            }
        };

        let layout = self
            .layout
            .as_ref()
            .ok_or_else(|| GridIoError::Shape("writer has no layout".into()))?;
        let array = self.build_array(layout)?;

        let mut start = vec![0u64; shape.len()];
        if let Some(axis) = layout.concat {
            start[axis] = offset as u64;
        }
        let subset =
            ArraySubset::new_with_start_shape(start, shape.iter().map(|&n| n as u64).collect())
                .map_err(|e| self.write_error(e))?;
        array
            .store_array_subset_elements(&subset, &chunk.data)
            .map_err(|e| self.write_error(e))?;

        if let Some(layout) = self.layout.as_mut() {
            layout.appended += 1;
        }

        tracing::trace!(
            path = %self.path.display(),
            offset = offset,
            shape = ?shape,
            "Appended chunk"
        );
        Ok(())
    }

    /// Store the array metadata and report the dataset's size on disk.
    pub fn finish(self) -> Result<WrittenDataset> {
        let layout = self
            .layout
            .as_ref()
            .ok_or_else(|| self.write_error("no data was written"))?;
        let array = self.build_array(layout)?;
        array.store_metadata().map_err(|e| self.write_error(e))?;

        let size_bytes = dataset_size(&self.path);
        let shape = layout.axes.iter().map(AxisCoords::len).collect();

        tracing::debug!(
            path = %self.path.display(),
            shape = ?shape,
            size_bytes = size_bytes,
            "Finished dataset"
        );

        Ok(WrittenDataset {
            path: self.path,
            shape,
            size_bytes,
        })
    }

    /// Delete everything written so far.
    pub fn abort(self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed partial dataset"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove partial dataset"
            ),
        }
    }

    fn check_compatible(layout: &Layout, chunk: &GridChunk, concat: &AxisKind) -> Result<()> {
        let same_axes = layout.axes.len() == chunk.axes.len()
            && layout
                .axes
                .iter()
                .zip(&chunk.axes)
                .all(|(a, b)| a.kind == b.kind);
        if !same_axes {
            return Err(GridIoError::Shape(format!(
                "chunk axes {:?} differ from dataset axes {:?}",
                chunk.axes.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
                layout.axes.iter().map(|a| a.name.as_str()).collect::<Vec<_>>()
            )));
        }
        for (i, (a, b)) in layout.axes.iter().zip(&chunk.axes).enumerate() {
            if Some(i) != layout.concat && a.len() != b.len() {
                return Err(GridIoError::Shape(format!(
                    "axis '{}' has length {} but the dataset has {} (appending along {})",
                    b.name,
                    b.len(),
                    a.len(),
                    concat
                )));
            }
        }
        Ok(())
    }

    fn build_array(&self, layout: &Layout) -> Result<Array<FilesystemStore>> {
        let attrs = DatasetAttributes::from_axes(
            &layout.variable,
            &layout.axes,
            layout.units.as_deref(),
        )
        .to_json();

        let chunk_grid: zarrs::array::ChunkGrid = layout
            .chunk_shape
            .clone()
            .try_into()
            .map_err(|e| GridIoError::Config(format!("{:?}", e)))?;

        let mut binding = ArrayBuilder::new(
            layout.shape(),
            DataType::Float32,
            chunk_grid,
            FillValue::from(f32::NAN),
        );
        let mut builder = binding.attributes(attrs);

        if self.options.compression != ZarrCompression::None {
            let codec = self.compression_codec()?;
            builder = builder.bytes_to_bytes_codecs(vec![codec]);
        }

        builder
            .build(self.store.clone(), "/")
            .map_err(|e| self.write_error(e))
    }

    fn compression_codec(&self) -> Result<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
        let level = BloscCompressionLevel::try_from(self.options.compression_level)
            .map_err(|_| GridIoError::Config("Invalid compression level".to_string()))?;

        let (shuffle, typesize) = if self.options.shuffle {
            (BloscShuffleMode::Shuffle, Some(4))
        } else {
            (BloscShuffleMode::NoShuffle, None)
        };

        let compressor = match self.options.compression {
            ZarrCompression::None => {
                return Err(GridIoError::Config("No compression configured".to_string()))
            }
            ZarrCompression::Lz4 | ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::Zstd | ZarrCompression::BloscZstd => BloscCompressor::Zstd,
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| GridIoError::Config(e.to_string()))?;
        Ok(Arc::new(codec))
    }

    fn write_error(&self, reason: impl ToString) -> GridIoError {
        GridIoError::write_failed(self.path.display().to_string(), reason)
    }
}

/// Total size in bytes of all files under a dataset directory.
pub fn dataset_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
