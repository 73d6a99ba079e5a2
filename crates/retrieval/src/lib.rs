//! Chunked retrieval of dataset sub-regions.
//!
//! A job names one variable in one or more sources and a [`Domain`] to cut
//! out of them. The [`RetrievalPipeline`] maps the domain onto every source,
//! serves what it can from the [`domain_cache`], splits the rest into chunks
//! with the [`PartitionPlanner`] and streams each chunk through the optional
//! transforms into a Zarr output.
//!
//! # Pipeline states
//!
//! ```text
//! OPENING → MAPPING → CACHE-CHECK → PARTITIONING → STREAMING → FINALIZING → DONE
//!    └──────────┴───────────┴─────────────┴──────────────┴───────────┴──► FAILED
//! ```
//!
//! [`Domain`]: grid_common::Domain

pub mod config;
pub mod job;
pub mod mapping;
pub mod partition;
pub mod pipeline;
pub mod status;
pub mod transform;

pub use config::RetrievalConfig;
pub use job::{CancelToken, GridderSpec, InputSpec, JobOutcome, JobSpec};
pub use mapping::{DomainMapper, MappedSources, SourceSelection};
pub use partition::{ChunkSpec, PartitionPlan, PartitionPlanner, PartitionStrategy};
pub use pipeline::{JobState, RetrievalPipeline};
pub use status::{MemoryStatusSink, StatusEvent, StatusSink, TracingStatusSink};
pub use transform::{ChunkTransform, TransformArgs, TransformRegistry};
