//! Job execution: open, map, consult the cache, partition and stream.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use domain_cache::{CacheEntry, CacheLookup, CacheRequest, CacheStore};
use grid_common::{AxisKind, GridError, GridResult, IndexSlice, TimeUnits};
use grid_io::{GridChunk, SourceAccessor, SourceHandle, ZarrGridWriter, ZarrSourceAccessor};
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::config::RetrievalConfig;
use crate::job::{CancelToken, JobOutcome, JobSpec};
use crate::mapping::{DomainMapper, SourceSelection};
use crate::partition::{ChunkSpec, PartitionPlanner, PartitionStrategy};
use crate::status::StatusSink;
use crate::transform::{apply_all, ChunkTransform, TransformRegistry};

/// Stage a job is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Opening,
    Mapping,
    CacheCheck,
    Partitioning,
    Streaming,
    Finalizing,
    Done,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Mapping => "mapping",
            Self::CacheCheck => "cache_check",
            Self::Partitioning => "partitioning",
            Self::Streaming => "streaming",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the chunks of one selection are read from.
struct Stream {
    selection: SourceSelection,
    handle: Arc<dyn SourceHandle>,
    /// Slices into `handle`, in array order.
    slices: Vec<(AxisKind, IndexSlice)>,
    /// Entry to materialize while streaming from the source.
    materialize: Option<CacheEntry>,
}

/// Per-job streaming state, handed to every chunk step.
struct JobContext {
    transforms: Vec<Box<dyn ChunkTransform>>,
    base_units: Option<TimeUnits>,
    output: Option<ZarrGridWriter>,
    cache_writers: Vec<(CacheEntry, ZarrGridWriter)>,
    chunks_streamed: usize,
    cache_hits: usize,
    cache_misses: usize,
}

impl JobContext {
    /// Transform one chunk and write it to the output.
    fn emit(&mut self, chunk: GridChunk) -> GridResult<()> {
        let chunk = apply_all(&self.transforms, chunk)?;
        if let Some(output) = self.output.as_mut() {
            output.append(&chunk)?;
        }
        self.chunks_streamed += 1;
        counter!("retrieval_chunks_streamed_total").increment(1);
        Ok(())
    }
}

/// Runs retrieval jobs against a source accessor and a shared cache.
pub struct RetrievalPipeline {
    accessor: Arc<dyn SourceAccessor>,
    cache: Arc<dyn CacheStore>,
    registry: Arc<TransformRegistry>,
    config: RetrievalConfig,
    mapper: DomainMapper,
    planner: PartitionPlanner,
    cache_reader: ZarrSourceAccessor,
}

impl RetrievalPipeline {
    pub fn new(accessor: Arc<dyn SourceAccessor>, cache: Arc<dyn CacheStore>, config: RetrievalConfig) -> Self {
        Self {
            accessor,
            cache,
            registry: Arc::new(TransformRegistry::with_builtins()),
            mapper: DomainMapper::new(config.cache.tolerance),
            planner: PartitionPlanner::new(config.spatial_step, config.time_block_len),
            config,
            cache_reader: ZarrSourceAccessor::default(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<TransformRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Run a job to completion and report its outcome to `sink`.
    ///
    /// Access errors are reported as `retry`, leaving the decision to the
    /// caller; use [`run_attempt`](Self::run_attempt) when no retry follows.
    pub async fn run(&self, job: &JobSpec, sink: &dyn StatusSink, cancel: &CancelToken) -> GridResult<JobOutcome> {
        self.run_attempt(job, sink, cancel, true).await
    }

    /// Run one attempt of a job.
    ///
    /// With `may_retry` false every error is reported to `sink` as `failed`.
    #[instrument(skip(self, job, sink, cancel), fields(job_id = %job.id))]
    pub async fn run_attempt(
        &self,
        job: &JobSpec,
        sink: &dyn StatusSink,
        cancel: &CancelToken,
        may_retry: bool,
    ) -> GridResult<JobOutcome> {
        let started = Instant::now();
        let result = self.execute(job, sink, cancel, started).await;

        match &result {
            Ok(outcome) => {
                log_state(job, JobState::Done);
                counter!("retrieval_jobs_total", "status" => "succeeded").increment(1);
                info!(
                    output = %outcome.output_path.display(),
                    shape = ?outcome.shape,
                    chunks = outcome.chunks_streamed,
                    cache_hits = outcome.cache_hits,
                    cache_misses = outcome.cache_misses,
                    duration_ms = outcome.duration_ms,
                    "Job completed"
                );
                sink.succeeded(&outcome.output_path.display().to_string());
            }
            Err(e) => {
                log_state(job, JobState::Failed);
                let reason = format!("{}: {}", e.kind(), e);
                if e.is_retryable() && may_retry {
                    counter!("retrieval_jobs_total", "status" => "retry").increment(1);
                    warn!(error = %e, kind = e.kind(), "Job failed with a transient error");
                    sink.retry(&reason);
                } else {
                    counter!("retrieval_jobs_total", "status" => "failed").increment(1);
                    warn!(error = %e, kind = e.kind(), "Job failed");
                    sink.failed(&reason);
                }
            }
        }
        result
    }

    async fn execute(
        &self,
        job: &JobSpec,
        sink: &dyn StatusSink,
        cancel: &CancelToken,
        started: Instant,
    ) -> GridResult<JobOutcome> {
        job.validate()?;
        let transforms = self.registry.resolve_job(job)?;

        log_state(job, JobState::Opening);
        let mut handles: Vec<Arc<dyn SourceHandle>> = Vec::with_capacity(job.inputs.len());
        let mut infos = Vec::with_capacity(job.inputs.len());
        for input in &job.inputs {
            // Handles opened so far are dropped on the way out
            let handle: Arc<dyn SourceHandle> = Arc::from(self.accessor.open(&input.uri).await?);
            infos.push((input.uri.clone(), handle.variable(&input.var_name)?));
            handles.push(handle);
        }

        log_state(job, JobState::Mapping);
        let mapped = self.mapper.map(&infos, &job.domain)?;
        for uri in &mapped.dropped {
            debug!(uri = %uri, "Domain does not intersect source, skipping");
        }

        let mut ctx = JobContext {
            transforms,
            base_units: mapped.base_units.clone(),
            output: None,
            cache_writers: Vec::new(),
            chunks_streamed: 0,
            cache_hits: 0,
            cache_misses: 0,
        };

        let streams = if job.reduces_time() {
            debug!("Job reduces over time, cache disabled");
            mapped
                .selections
                .into_iter()
                .map(|selection| Stream {
                    handle: handles[selection.input].clone(),
                    slices: selection.slices.clone(),
                    materialize: None,
                    selection,
                })
                .collect()
        } else {
            log_state(job, JobState::CacheCheck);
            self.check_cache(mapped.selections, &handles, &mut ctx).await?
        };
        drop(handles);

        let result = self.stream(job, &streams, &mut ctx, sink, cancel).await;
        let result = match result {
            Ok(()) => self.finalize(job, &mut ctx, started).await,
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Some(output) = ctx.output.take() {
                output.abort();
            }
            for (entry, writer) in ctx.cache_writers.drain(..) {
                self.cache.abandon(&entry, writer).await;
            }
        }
        result
    }

    /// Substitute cached datasets for sources where possible and reserve
    /// space for the rest.
    async fn check_cache(
        &self,
        selections: Vec<SourceSelection>,
        handles: &[Arc<dyn SourceHandle>],
        ctx: &mut JobContext,
    ) -> GridResult<Vec<Stream>> {
        let mut streams = Vec::with_capacity(selections.len());
        for selection in selections {
            let request = selection.cache_request();
            let source = handles[selection.input].clone();

            let cached = match self.cache.lookup(&request).await? {
                CacheLookup::Hit(entry) => self.open_cached(&entry, &selection, true),
                CacheLookup::Contained(entry) => self.open_cached(&entry, &selection, false),
                CacheLookup::Miss(entry) => {
                    streams.push(Stream {
                        handle: source,
                        slices: selection.slices.clone(),
                        materialize: Some(entry),
                        selection,
                    });
                    continue;
                }
            };

            match cached {
                Some((handle, slices)) => {
                    ctx.cache_hits += 1;
                    streams.push(Stream {
                        handle,
                        slices,
                        materialize: None,
                        selection,
                    });
                }
                None => {
                    let entry = self.cache.pending(&request).await?;
                    streams.push(Stream {
                        handle: source,
                        slices: selection.slices.clone(),
                        materialize: Some(entry),
                        selection,
                    });
                }
            }
        }

        let misses: Vec<CacheRequest> = streams
            .iter()
            .filter(|s| s.materialize.is_some())
            .map(|s| s.selection.cache_request())
            .collect();
        ctx.cache_misses = misses.len();
        if !misses.is_empty() {
            let refs: Vec<&CacheRequest> = misses.iter().collect();
            let required = self.cache.estimate_required_space(&refs);
            self.cache.reserve(required).await?;
        }
        Ok(streams)
    }

    /// Open a cached dataset and locate the selection in it.
    ///
    /// `None` means the entry cannot serve the selection and the source has
    /// to be read instead.
    fn open_cached(
        &self,
        entry: &CacheEntry,
        selection: &SourceSelection,
        exact: bool,
    ) -> Option<(Arc<dyn SourceHandle>, Vec<(AxisKind, IndexSlice)>)> {
        let path = entry.local_path.display().to_string();
        let handle = match self.cache_reader.open_blocking(&path) {
            Ok(handle) => Arc::<dyn SourceHandle>::from(handle),
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Cached dataset unreadable, reading source");
                return None;
            }
        };
        let info = match handle.variable(&selection.variable) {
            Ok(info) => info,
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Cached dataset lacks variable, reading source");
                return None;
            }
        };

        let slices = if exact {
            if info.shape() != selection.shape() {
                warn!(
                    key = %entry.key,
                    cached = ?info.shape(),
                    expected = ?selection.shape(),
                    "Cached dataset shape differs, reading source"
                );
                return None;
            }
            info.axes
                .iter()
                .map(|axis| (axis.kind.clone(), IndexSlice::full(axis.len())))
                .collect()
        } else {
            match self.mapper.remap_onto(selection, &info.axes) {
                Some(slices) => slices,
                None => {
                    debug!(key = %entry.key, "Containing entry does not match selection, reading source");
                    return None;
                }
            }
        };

        debug!(key = %entry.key, path = %path, "Serving selection from cache");
        Some((handle, slices))
    }

    async fn stream(
        &self,
        job: &JobSpec,
        streams: &[Stream],
        ctx: &mut JobContext,
        sink: &dyn StatusSink,
        cancel: &CancelToken,
    ) -> GridResult<()> {
        let output_path = self.config.output_dir.join(format!("{}.zarr", job.id));

        if job.reduces_time() {
            return self.stream_reduced(job, streams, ctx, output_path, sink, cancel);
        }

        log_state(job, JobState::Partitioning);
        let plans = streams
            .iter()
            .map(|s| self.planner.plan(&s.slices, &PartitionStrategy::Temporal))
            .collect::<GridResult<Vec<_>>>()?;

        log_state(job, JobState::Streaming);
        ctx.output = Some(ZarrGridWriter::create(
            &output_path,
            AxisKind::Time,
            self.config.zarr.clone(),
        )?);

        for (n, (stream, plan)) in streams.iter().zip(&plans).enumerate() {
            let cache_slot = match &stream.materialize {
                Some(entry) => {
                    let writer = self.cache.create_writer(entry, AxisKind::Time).await?;
                    ctx.cache_writers.push((entry.clone(), writer));
                    Some(ctx.cache_writers.len() - 1)
                }
                None => None,
            };

            for chunk_spec in &plan.chunks {
                cancel.check()?;
                let mut chunk = read_chunk(stream, chunk_spec)?;
                if let Some(slot) = cache_slot {
                    ctx.cache_writers[slot].1.append(&chunk)?;
                }
                stream.selection.remap_time(&mut chunk, ctx.base_units.as_ref())?;
                ctx.emit(chunk)?;

                let percent = (chunk_spec.index + 1) as f64 / plan.len() as f64 * 100.0;
                debug!(
                    uri = %stream.selection.uri,
                    chunk = chunk_spec.index,
                    percent = percent,
                    "Streamed chunk"
                );
                sink.progress(
                    &format!(
                        "source {}/{} ({}): chunk {}/{}",
                        n + 1,
                        streams.len(),
                        stream.selection.uri,
                        chunk_spec.index + 1,
                        plan.len()
                    ),
                    percent,
                );
            }
        }
        Ok(())
    }

    /// Stream spatial tiles, each joined across all sources along time.
    fn stream_reduced(
        &self,
        job: &JobSpec,
        streams: &[Stream],
        ctx: &mut JobContext,
        output_path: PathBuf,
        sink: &dyn StatusSink,
        cancel: &CancelToken,
    ) -> GridResult<()> {
        log_state(job, JobState::Partitioning);
        let mut skip = job.reduce_axes();
        if job.gridder.is_some() {
            skip.extend([AxisKind::Latitude, AxisKind::Longitude]);
        }
        let strategy = PartitionStrategy::Spatial { skip };
        let plans = streams
            .iter()
            .map(|s| self.planner.plan(&s.slices, &strategy))
            .collect::<GridResult<Vec<_>>>()?;

        let total = plans.first().map(|p| p.len()).unwrap_or(0);
        if let Some(plan) = plans.iter().find(|p| p.len() != total) {
            return Err(GridError::shape_mismatch(format!(
                "sources split into {} and {} chunks",
                total,
                plan.len()
            )));
        }
        let concat_axis = plans
            .first()
            .and_then(|p| p.axis.clone())
            .unwrap_or(AxisKind::Time);

        log_state(job, JobState::Streaming);
        ctx.output = Some(ZarrGridWriter::create(
            &output_path,
            concat_axis,
            self.config.zarr.clone(),
        )?);

        for i in 0..total {
            cancel.check()?;
            let mut parts = Vec::with_capacity(streams.len());
            for (stream, plan) in streams.iter().zip(&plans) {
                let mut chunk = read_chunk(stream, &plan.chunks[i])?;
                stream.selection.remap_time(&mut chunk, ctx.base_units.as_ref())?;
                parts.push(chunk);
            }
            let combined = GridChunk::concat(parts, &AxisKind::Time)?;
            ctx.emit(combined)?;

            let percent = (i + 1) as f64 / total as f64 * 100.0;
            debug!(chunk = i, percent = percent, "Streamed reduced chunk");
            sink.progress(&format!("chunk {}/{} across {} sources", i + 1, total, streams.len()), percent);
        }
        Ok(())
    }

    async fn finalize(&self, job: &JobSpec, ctx: &mut JobContext, started: Instant) -> GridResult<JobOutcome> {
        log_state(job, JobState::Finalizing);

        // Cache entries that fail to materialize stay pending
        while let Some((entry, writer)) = ctx.cache_writers.pop() {
            let finished = match writer.finish() {
                Ok(finished) => finished,
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Failed to close cache dataset");
                    continue;
                }
            };
            if let Err(e) = self.cache.finalize(&entry, &finished.path).await {
                warn!(key = %entry.key, error = %e, "Failed to materialize cache entry");
            }
        }

        let output = ctx
            .output
            .take()
            .ok_or_else(|| GridError::internal("output was never opened"))?;
        let path = output.path().to_path_buf();
        let written = match output.finish() {
            Ok(written) => written,
            Err(e) => {
                if let Err(rm) = std::fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), error = %rm, "Failed to remove unfinished output");
                }
                return Err(e.into());
            }
        };

        Ok(JobOutcome {
            job_id: job.id,
            output_path: written.path,
            shape: written.shape,
            chunks_streamed: ctx.chunks_streamed,
            cache_hits: ctx.cache_hits,
            cache_misses: ctx.cache_misses,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Read one chunk and reject empty results.
fn read_chunk(stream: &Stream, spec: &ChunkSpec) -> GridResult<GridChunk> {
    let chunk = stream
        .handle
        .read(&stream.selection.variable, &spec.selection())?;
    chunk.ensure_non_empty()?;
    Ok(chunk)
}

fn log_state(job: &JobSpec, state: JobState) {
    info!(job_id = %job.id, state = %state, "Job state");
}
