//! Synthetic datasets written in the layout the readers expect.
//!
//! A fixture describes a variable and its axes; `write` stores it as a Zarr
//! dataset so tests exercise the real reader.

use std::path::{Path, PathBuf};

use grid_io::{AxisCoords, GridChunk, ZarrGridWriter, ZarrWriteOptions};

use crate::generators::{create_coded_grid, regular_axis};

/// Reference units used by the fixture time axes unless overridden.
pub const DEFAULT_TIME_UNITS: &str = "days since 2000-01-01 00:00:00";

/// Builder for a small on-disk dataset.
#[derive(Debug, Clone)]
pub struct DatasetFixture {
    pub variable: String,
    pub axes: Vec<AxisCoords>,
    pub units: Option<String>,
    values: Option<Vec<f32>>,
}

impl DatasetFixture {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            axes: Vec::new(),
            units: None,
            values: None,
        }
    }

    /// `tas` on `times` daily steps from `first_day`, a 1° grid of
    /// latitudes `-10..10` and longitudes `0..40`.
    pub fn tas(first_day: f64, times: usize) -> Self {
        Self::new("tas")
            .with_units("K")
            .time(DEFAULT_TIME_UNITS, regular_axis(first_day, 1.0, times))
            .latitude(regular_axis(-10.0, 1.0, 20))
            .longitude(regular_axis(0.0, 1.0, 40))
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn time(self, units: &str, offsets: Vec<f64>) -> Self {
        self.axis(AxisCoords::new("time", offsets).with_units(units))
    }

    pub fn latitude(self, values: Vec<f64>) -> Self {
        self.axis(AxisCoords::new("lat", values).with_units("degrees_north"))
    }

    pub fn longitude(self, values: Vec<f64>) -> Self {
        self.axis(AxisCoords::new("lon", values).with_units("degrees_east"))
    }

    pub fn level(self, values: Vec<f64>) -> Self {
        self.axis(AxisCoords::new("lev", values).with_units("Pa"))
    }

    /// Append an axis after the ones already declared.
    pub fn axis(mut self, axis: AxisCoords) -> Self {
        self.axes.push(axis);
        self
    }

    /// Use explicit values instead of the coded grid.
    pub fn values(mut self, values: Vec<f32>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(AxisCoords::len).collect()
    }

    /// The whole dataset as one chunk.
    pub fn chunk(&self) -> GridChunk {
        let data = self
            .values
            .clone()
            .unwrap_or_else(|| create_coded_grid(&self.shape()));
        GridChunk::new(&self.variable, self.axes.clone(), data)
            .expect("fixture values must match the axes")
            .with_units(self.units.clone())
    }

    /// Write the dataset to `path` and return the path.
    pub fn write(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref().to_path_buf();
        let concat = self
            .axes
            .first()
            .map(|a| a.kind.clone())
            .expect("fixture needs at least one axis");
        let mut writer = ZarrGridWriter::create(&path, concat, ZarrWriteOptions::uncompressed())
            .expect("failed to create fixture dataset");
        writer
            .append(&self.chunk())
            .expect("failed to write fixture data");
        writer.finish().expect("failed to finish fixture dataset");
        path
    }

    /// Write the dataset as `<dir>/<name>.zarr` and return its URI.
    pub fn write_in(&self, dir: &Path, name: &str) -> String {
        self.write(dir.join(format!("{}.zarr", name)))
            .display()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_common::{AxisKind, IndexSlice};
    use grid_io::{SourceAccessor, ZarrSourceAccessor};

    #[test]
    fn test_tas_shape() {
        let fixture = DatasetFixture::tas(0.0, 5);
        assert_eq!(fixture.shape(), vec![5, 20, 40]);
        assert_eq!(fixture.chunk().axes[0].kind, AxisKind::Time);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_written_fixture_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let uri = DatasetFixture::tas(10.0, 3).write_in(dir.path(), "tas");

        let handle = ZarrSourceAccessor::default().open(&uri).await.unwrap();
        let info = handle.variable("tas").unwrap();
        assert_eq!(info.shape(), vec![3, 20, 40]);
        assert_eq!(info.axes[0].values, vec![10.0, 11.0, 12.0]);
        assert_eq!(info.units.as_deref(), Some("K"));

        let chunk = handle
            .read(
                "tas",
                &[
                    IndexSlice::new(1, 2, 1),
                    IndexSlice::new(2, 3, 1),
                    IndexSlice::new(4, 6, 1),
                ],
            )
            .unwrap();
        assert_eq!(chunk.data, vec![10204.0, 10205.0]);
    }
}
