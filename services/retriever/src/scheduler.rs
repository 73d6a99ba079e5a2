//! Concurrent job execution with retry on transient failures.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use grid_common::GridResult;
use retrieval::{CancelToken, JobOutcome, JobSpec, RetrievalPipeline, StatusSink, TracingStatusSink};
use serde::Serialize;
use tracing::{error, info, warn};

/// Retry settings for jobs failing with access errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), doubling each time.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        std::cmp::min(self.initial_delay.saturating_mul(factor), self.max_delay)
    }
}

/// Final state of one job of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    /// Where the job was loaded from.
    pub source: String,
    pub job_id: String,
    pub status: &'static str,
    pub attempts: u32,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl JobReport {
    fn new(source: String, job: &JobSpec, result: GridResult<JobOutcome>, attempts: u32) -> Self {
        let (status, output, error) = match result {
            Ok(outcome) => ("succeeded", Some(outcome.output_path.display().to_string()), None),
            Err(e) => ("failed", None, Some(format!("{}: {}", e.kind(), e))),
        };
        Self {
            source,
            job_id: job.id.to_string(),
            status,
            attempts,
            output,
            error,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

/// Runs jobs on a bounded pool of tokio tasks.
pub struct Scheduler {
    pipeline: Arc<RetrievalPipeline>,
    max_concurrent: usize,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new(pipeline: Arc<RetrievalPipeline>, max_concurrent: usize, retry: RetryPolicy, cancel: CancelToken) -> Self {
        Self {
            pipeline,
            max_concurrent: max_concurrent.max(1),
            retry,
            cancel,
        }
    }

    /// Run one job, retrying access errors with exponential backoff.
    ///
    /// Returns the last result and the number of attempts made.
    pub async fn run_job(&self, job: &JobSpec) -> (GridResult<JobOutcome>, u32) {
        self.run_job_with(job, &TracingStatusSink::new(job.id)).await
    }

    /// [`run_job`](Self::run_job) reporting to `sink`.
    ///
    /// Only the last attempt reports a terminal `failed`.
    pub async fn run_job_with(&self, job: &JobSpec, sink: &dyn StatusSink) -> (GridResult<JobOutcome>, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let may_retry = attempt <= self.retry.max_retries && !self.cancel.is_cancelled();
            match self.pipeline.run_attempt(job, sink, &self.cancel, may_retry).await {
                Err(e) if e.is_retryable() && may_retry && !self.cancel.is_cancelled() => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        job_id = %job.id,
                        error = %e,
                        retry = attempt,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Job failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() && may_retry => {
                    // Cancelled while the attempt ran; no retry follows
                    sink.failed(&format!("{}: {}", e.kind(), e));
                    return (Err(e), attempt);
                }
                result => return (result, attempt),
            }
        }
    }

    /// Run every job, at most `max_concurrent` at a time.
    ///
    /// Reports come back in completion order.
    pub async fn run_all(self: &Arc<Self>, jobs: Vec<(String, JobSpec)>) -> Vec<JobReport> {
        let total = jobs.len();
        info!(jobs = total, max_concurrent = self.max_concurrent, "Starting batch");

        let reports: Vec<JobReport> = stream::iter(jobs)
            .map(|(source, job)| {
                let this = Arc::clone(self);
                let fallback = (source.clone(), job.id.to_string());
                let handle = tokio::spawn(async move {
                    let (result, attempts) = this.run_job(&job).await;
                    JobReport::new(source, &job, result, attempts)
                });
                async move {
                    handle.await.unwrap_or_else(|e| {
                        error!(source = %fallback.0, error = %e, "Job task aborted");
                        JobReport {
                            source: fallback.0,
                            job_id: fallback.1,
                            status: "failed",
                            attempts: 0,
                            output: None,
                            error: Some(format!("task aborted: {}", e)),
                        }
                    })
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let succeeded = reports.iter().filter(|r| r.succeeded()).count();
        info!(
            succeeded = succeeded,
            failed = total - succeeded,
            "Batch complete"
        );
        reports
    }
}
