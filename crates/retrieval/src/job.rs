//! Job description, outcome and cancellation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use grid_common::{AxisKind, Domain, GridError, GridResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One input variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub uri: String,
    pub var_name: String,
}

impl InputSpec {
    pub fn new(uri: impl Into<String>, var_name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            var_name: var_name.into(),
        }
    }
}

/// Target grid for regridding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridderSpec {
    /// Interpolation method: `nearest`, `bilinear` or `cubic`.
    #[serde(default = "default_method")]
    pub method: String,

    /// `uniform~<dlat>x<dlon>` or a latitude/longitude domain with steps.
    pub grid: GridTarget,
}

fn default_method() -> String {
    "bilinear".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GridTarget {
    Named(String),
    Bounds(Domain),
}

/// A retrieval job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub inputs: Vec<InputSpec>,

    #[serde(default)]
    pub domain: Domain,

    /// Transform applied to every chunk, e.g. `mean`.
    #[serde(default)]
    pub operation: Option<String>,

    /// Axes the operation reduces over.
    #[serde(default)]
    pub axes: Vec<String>,

    #[serde(default)]
    pub gridder: Option<GridderSpec>,
}

impl JobSpec {
    pub fn new(inputs: Vec<InputSpec>, domain: Domain) -> Self {
        Self {
            id: Uuid::new_v4(),
            inputs,
            domain,
            operation: None,
            axes: Vec::new(),
            gridder: None,
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>, axes: &[&str]) -> Self {
        self.operation = Some(operation.into());
        self.axes = axes.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_gridder(mut self, gridder: GridderSpec) -> Self {
        self.gridder = Some(gridder);
        self
    }

    /// Load a job from a YAML or JSON file.
    pub fn from_file(path: &Path) -> GridResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| GridError::config(format!("{}: {}", path.display(), e)))?;
        // YAML is a superset of JSON
        let job: Self = serde_yaml::from_str(&text)
            .map_err(|e| GridError::config(format!("{}: {}", path.display(), e)))?;
        job.validate()?;
        Ok(job)
    }

    pub fn validate(&self) -> GridResult<()> {
        if self.inputs.is_empty() {
            return Err(GridError::config("job has no inputs"));
        }
        if let Some(input) = self.inputs.iter().find(|i| i.var_name.is_empty()) {
            return Err(GridError::config(format!(
                "input '{}' has no variable name",
                input.uri
            )));
        }
        if !self.axes.is_empty() && self.operation.is_none() {
            return Err(GridError::config("axes given without an operation"));
        }
        Ok(())
    }

    /// Variable name shared by the inputs.
    pub fn variable(&self) -> &str {
        self.inputs.first().map(|i| i.var_name.as_str()).unwrap_or("")
    }

    /// Axes the operation reduces over.
    pub fn reduce_axes(&self) -> Vec<AxisKind> {
        self.axes.iter().map(|a| AxisKind::from_name(a)).collect()
    }

    /// Whether the operation collapses the time axis.
    pub fn reduces_time(&self) -> bool {
        self.operation.is_some() && self.reduce_axes().iter().any(AxisKind::is_time)
    }
}

/// Result of a successful job.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub output_path: PathBuf,
    pub shape: Vec<usize>,
    pub chunks_streamed: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub duration_ms: u64,
}

/// Cooperative cancellation flag shared with a running job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancelled.
    pub fn check(&self) -> GridResult<()> {
        if self.is_cancelled() {
            Err(GridError::Cancelled)
        } else {
            Ok(())
        }
    }
}
