//! Source accessors that count calls and inject faults.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use grid_common::IndexSlice;
use grid_io::{GridChunk, GridIoError, SourceAccessor, SourceHandle, VariableInfo, ZarrSourceAccessor};

type IoResult<T> = std::result::Result<T, GridIoError>;

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicUsize,
    reads: AtomicUsize,
}

/// Wraps another accessor, recording opens and reads and failing on demand.
///
/// Clones share their counters and fault settings.
#[derive(Clone)]
pub struct FaultyAccessor {
    inner: Arc<dyn SourceAccessor>,
    counters: Arc<Counters>,
    open_failures_left: Arc<AtomicUsize>,
    failing_uris: Arc<Mutex<HashSet<String>>>,
    empty_reads: bool,
}

impl Default for FaultyAccessor {
    fn default() -> Self {
        Self::new(Arc::new(ZarrSourceAccessor::default()))
    }
}

impl FaultyAccessor {
    pub fn new(inner: Arc<dyn SourceAccessor>) -> Self {
        Self {
            inner,
            counters: Arc::new(Counters::default()),
            open_failures_left: Arc::new(AtomicUsize::new(0)),
            failing_uris: Arc::new(Mutex::new(HashSet::new())),
            empty_reads: false,
        }
    }

    /// Fail the next `n` opens, whatever the URI.
    pub fn fail_next_opens(self, n: usize) -> Self {
        self.open_failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Always fail to open `uri`.
    pub fn fail_uri(self, uri: impl Into<String>) -> Self {
        self.failing_uris
            .lock()
            .expect("fault set poisoned")
            .insert(uri.into());
        self
    }

    /// Make every read return a chunk whose first axis has length zero.
    pub fn empty_reads(mut self) -> Self {
        self.empty_reads = true;
        self
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        self.counters.opens.store(0, Ordering::SeqCst);
        self.counters.reads.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceAccessor for FaultyAccessor {
    async fn open(&self, uri: &str) -> IoResult<Box<dyn SourceHandle>> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);

        if self
            .failing_uris
            .lock()
            .expect("fault set poisoned")
            .contains(uri)
        {
            return Err(GridIoError::open_failed(uri, "injected open failure"));
        }
        let fail = self
            .open_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(GridIoError::open_failed(uri, "injected transient failure"));
        }

        let inner = self.inner.open(uri).await?;
        Ok(Box::new(CountingHandle {
            inner,
            counters: Arc::clone(&self.counters),
            empty_reads: self.empty_reads,
        }))
    }
}

struct CountingHandle {
    inner: Box<dyn SourceHandle>,
    counters: Arc<Counters>,
    empty_reads: bool,
}

impl SourceHandle for CountingHandle {
    fn uri(&self) -> &str {
        self.inner.uri()
    }

    fn variable(&self, name: &str) -> IoResult<VariableInfo> {
        self.inner.variable(name)
    }

    fn read(&self, variable: &str, selection: &[IndexSlice]) -> IoResult<GridChunk> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if !self.empty_reads {
            return self.inner.read(variable, selection);
        }

        let mut emptied = selection.to_vec();
        if let Some(first) = emptied.first_mut() {
            first.stop = first.start;
        }
        self.inner.read(variable, &emptied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::DatasetFixture;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_counts_and_faults() {
        let dir = tempfile::tempdir().unwrap();
        let uri = DatasetFixture::tas(0.0, 2).write_in(dir.path(), "tas");

        let accessor = FaultyAccessor::default().fail_next_opens(1);
        assert!(accessor.open(&uri).await.is_err());
        let handle = accessor.open(&uri).await.unwrap();
        assert_eq!(accessor.opens(), 2);

        let full: Vec<IndexSlice> = [2, 20, 40].iter().map(|&n| IndexSlice::full(n)).collect();
        handle.read("tas", &full).unwrap();
        assert_eq!(accessor.reads(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_reads() {
        let dir = tempfile::tempdir().unwrap();
        let uri = DatasetFixture::tas(0.0, 2).write_in(dir.path(), "tas");

        let accessor = FaultyAccessor::default().empty_reads();
        let handle = accessor.open(&uri).await.unwrap();
        let full: Vec<IndexSlice> = [2, 20, 40].iter().map(|&n| IndexSlice::full(n)).collect();
        let chunk = handle.read("tas", &full).unwrap();
        assert_eq!(chunk.shape(), vec![0, 20, 40]);
    }

    #[tokio::test]
    async fn test_failing_uri() {
        let accessor = FaultyAccessor::default().fail_uri("/nowhere.zarr");
        let err = accessor.open("/nowhere.zarr").await.err().unwrap();
        assert!(err.is_open_failure());
    }
}
