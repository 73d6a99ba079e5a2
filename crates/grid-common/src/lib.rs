//! Common types and utilities shared across the grid retrieval workspace.

pub mod axis;
pub mod domain;
pub mod error;
pub mod time;

pub use axis::{AxisKind, AxisRange, Crs, Extent, IndexSlice};
pub use domain::{Dimension, Domain, DEFAULT_TOLERANCE};
pub use error::{GridError, GridResult};
pub use time::{TimeParseError, TimeUnit, TimeUnits};
