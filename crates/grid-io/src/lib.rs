//! Chunked access to gridded datasets.
//!
//! A dataset is a single Zarr V3 array whose attributes describe the
//! variable it holds and the coordinates of every axis:
//!
//! ```text
//! tas.zarr/
//!   zarr.json      { shape: [time, lat, lon], attributes: {
//!                      variable: "tas",
//!                      dimensions: ["time", "lat", "lon"],
//!                      coordinates: { time: [...], lat: [...], lon: [...] },
//!                      units: { time: "days since 2000-01-01", tas: "K" } } }
//!   c/0/0/0 ...
//! ```
//!
//! [`SourceAccessor`] opens datasets by URI (local path, `file://`, `s3://`,
//! `http(s)://`) and [`ZarrGridWriter`] streams chunks into a new dataset,
//! which is how both cache entries and job outputs are produced.

pub mod accessor;
pub mod chunk;
pub mod config;
pub mod dataset;
pub mod error;
pub mod source;
pub mod storage;
pub mod writer;

pub use accessor::ZarrSourceAccessor;
pub use chunk::{AxisCoords, GridChunk};
pub use config::{ZarrCompression, ZarrWriteOptions};
pub use dataset::DatasetAttributes;
pub use error::{GridIoError, Result};
pub use source::{SourceAccessor, SourceHandle, VariableInfo, ZarrSource};
pub use storage::{ObjectStoreConfig, TokioBlockOn};
pub use writer::{WrittenDataset, ZarrGridWriter};
