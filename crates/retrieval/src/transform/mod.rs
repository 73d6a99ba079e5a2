//! Per-chunk transforms and the registry resolving them by name.
//!
//! A transform is a pure function of one chunk. It may drop axes (a
//! reduction) or replace coordinates (regridding) but never mutates its
//! input.

mod interpolation;
mod mean;
mod regrid;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use grid_common::{AxisKind, GridError, GridResult};
use grid_io::GridChunk;

use crate::job::{GridderSpec, JobSpec};

pub use interpolation::InterpolationMethod;
pub use mean::MeanTransform;
pub use regrid::{RegridTransform, TargetGrid};

/// A pure function from one chunk to one chunk.
pub trait ChunkTransform: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, chunk: &GridChunk) -> GridResult<GridChunk>;
}

/// Arguments a transform is built from.
#[derive(Debug, Clone, Default)]
pub struct TransformArgs {
    /// Axes to reduce over.
    pub axes: Vec<AxisKind>,
    pub gridder: Option<GridderSpec>,
}

/// Returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl ChunkTransform for IdentityTransform {
    fn name(&self) -> &str {
        "identity"
    }

    fn apply(&self, chunk: &GridChunk) -> GridResult<GridChunk> {
        Ok(chunk.clone())
    }
}

type Builder = Arc<dyn Fn(&TransformArgs) -> GridResult<Box<dyn ChunkTransform>> + Send + Sync>;

/// Lookup table from operation identifiers to transform builders.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    builders: HashMap<String, Builder>,
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.builders.keys().collect();
        names.sort();
        f.debug_struct("TransformRegistry").field("names", &names).finish()
    }
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `identity`, `mean` and `regrid` and their aliases.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for name in ["identity", "subset", "aggregate"] {
            registry.register(name, |_| Ok(Box::new(IdentityTransform)));
        }
        for name in ["mean", "average"] {
            registry.register(name, |args| Ok(Box::new(MeanTransform::new(args.axes.clone())?)));
        }
        registry.register("regrid", |args| {
            let gridder = args
                .gridder
                .as_ref()
                .ok_or_else(|| GridError::config("regrid needs a gridder"))?;
            Ok(Box::new(RegridTransform::from_spec(gridder)?))
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, builder: F)
    where
        F: Fn(&TransformArgs) -> GridResult<Box<dyn ChunkTransform>> + Send + Sync + 'static,
    {
        self.builders.insert(name.to_lowercase(), Arc::new(builder));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(&name.to_lowercase())
    }

    /// Build the transform registered as `name`.
    pub fn resolve(&self, name: &str, args: &TransformArgs) -> GridResult<Box<dyn ChunkTransform>> {
        let builder = self
            .builders
            .get(&name.to_lowercase())
            .ok_or_else(|| GridError::config(format!("unknown operation '{}'", name)))?;
        builder(args)
    }

    /// Resolve the transforms of a job, in application order: the gridder
    /// first, then the operation.
    pub fn resolve_job(&self, job: &JobSpec) -> GridResult<Vec<Box<dyn ChunkTransform>>> {
        let args = TransformArgs {
            axes: job.reduce_axes(),
            gridder: job.gridder.clone(),
        };
        let mut transforms = Vec::new();
        if job.gridder.is_some() {
            transforms.push(self.resolve("regrid", &args)?);
        }
        if let Some(operation) = &job.operation {
            if operation.to_lowercase() != "regrid" || job.gridder.is_none() {
                transforms.push(self.resolve(operation, &args)?);
            }
        }
        Ok(transforms)
    }
}

/// Apply transforms in order.
pub fn apply_all(transforms: &[Box<dyn ChunkTransform>], chunk: GridChunk) -> GridResult<GridChunk> {
    let mut current = chunk;
    for transform in transforms {
        current = transform.apply(&current)?;
    }
    Ok(current)
}
