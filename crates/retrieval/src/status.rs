//! Job status reporting.

use std::sync::Mutex;

use tracing::{error, info, warn};

/// Receives progress and the terminal outcome of a job.
///
/// Exactly one of `succeeded`, `failed` or `retry` is called per run.
pub trait StatusSink: Send + Sync {
    fn progress(&self, message: &str, percent: f64);

    /// The job is done; `output` is the path of the written dataset.
    fn succeeded(&self, output: &str);

    /// The job failed permanently.
    fn failed(&self, reason: &str);

    /// The job failed on a transient error and may be resubmitted.
    fn retry(&self, reason: &str);
}

/// Reports through structured logs.
#[derive(Debug, Clone)]
pub struct TracingStatusSink {
    job_id: String,
}

impl TracingStatusSink {
    pub fn new(job_id: impl ToString) -> Self {
        Self {
            job_id: job_id.to_string(),
        }
    }
}

impl StatusSink for TracingStatusSink {
    fn progress(&self, message: &str, percent: f64) {
        info!(job_id = %self.job_id, percent = percent, "{}", message);
    }

    fn succeeded(&self, output: &str) {
        info!(job_id = %self.job_id, output = %output, "Job succeeded");
    }

    fn failed(&self, reason: &str) {
        error!(job_id = %self.job_id, reason = %reason, "Job failed");
    }

    fn retry(&self, reason: &str) {
        warn!(job_id = %self.job_id, reason = %reason, "Job failed, retry possible");
    }
}

/// A recorded status call.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Progress { message: String, percent: f64 },
    Succeeded(String),
    Failed(String),
    Retry(String),
}

impl StatusEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Records every call in memory.
#[derive(Debug, Default)]
pub struct MemoryStatusSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.lock().clone()
    }

    /// Percentages of all progress calls, in order.
    pub fn percents(&self) -> Vec<f64> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    pub fn terminal(&self) -> Option<StatusEvent> {
        self.lock().iter().rev().find(|e| e.is_terminal()).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StatusEvent>> {
        // A panic while recording leaves the list intact.
        self.events.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn push(&self, event: StatusEvent) {
        self.lock().push(event);
    }
}

impl StatusSink for MemoryStatusSink {
    fn progress(&self, message: &str, percent: f64) {
        self.push(StatusEvent::Progress {
            message: message.to_string(),
            percent,
        });
    }

    fn succeeded(&self, output: &str) {
        self.push(StatusEvent::Succeeded(output.to_string()));
    }

    fn failed(&self, reason: &str) {
        self.push(StatusEvent::Failed(reason.to_string()));
    }

    fn retry(&self, reason: &str) {
        self.push(StatusEvent::Retry(reason.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemoryStatusSink::new();
        sink.progress("chunk 1/2", 50.0);
        sink.progress("chunk 2/2", 100.0);
        sink.succeeded("/out/a.zarr");

        assert_eq!(sink.percents(), vec![50.0, 100.0]);
        assert_eq!(sink.events().len(), 3);
        assert_eq!(sink.terminal(), Some(StatusEvent::Succeeded("/out/a.zarr".into())));
    }

    #[test]
    fn test_terminal_events() {
        let sink = MemoryStatusSink::new();
        assert_eq!(sink.terminal(), None);
        sink.retry("timeout");
        assert!(sink.terminal().unwrap().is_terminal());
        assert!(!StatusEvent::Progress {
            message: String::new(),
            percent: 0.0
        }
        .is_terminal());
    }

    #[test]
    fn test_sinks_are_object_safe() {
        let sinks: Vec<Box<dyn StatusSink>> = vec![
            Box::new(TracingStatusSink::new("job-1")),
            Box::new(MemoryStatusSink::new()),
        ];
        for sink in &sinks {
            sink.progress("start", 0.0);
            sink.failed("boom");
        }
    }
}
