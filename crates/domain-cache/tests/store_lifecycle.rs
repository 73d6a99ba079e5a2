//! Cache store behavior against real Zarr files and an in-memory catalog.

use std::path::Path;

use chrono::{Duration, Utc};
use domain_cache::{
    CacheCatalog, CacheConfig, CacheEntry, CacheLookup, CacheRequest, CacheStore, DiskCacheStore,
    EntryState,
};
use grid_common::{AxisKind, AxisRange, Domain, GridError, IndexSlice};
use grid_io::ZarrWriteOptions;
use test_utils::DatasetFixture;

const SOURCE: &str = "/data/tas_day.zarr";

async fn store_in(dir: &Path, max_bytes: u64, strict: bool) -> DiskCacheStore {
    let config = CacheConfig {
        cache_dir: dir.to_path_buf(),
        max_bytes,
        strict_capacity: strict,
        ..Default::default()
    };
    let catalog = CacheCatalog::open_memory().await.unwrap();
    DiskCacheStore::with_catalog(config, ZarrWriteOptions::uncompressed(), catalog)
}

/// Request on the `DatasetFixture::tas` grid: daily time, 1° lat from -10, 1° lon from 0.
fn request(time: (usize, usize), lat: (usize, usize), lon: (usize, usize)) -> CacheRequest {
    let extent = Domain::new()
        .with(AxisKind::Time, AxisRange::indices(time.0, time.1))
        .with(
            AxisKind::Latitude,
            AxisRange::values(-10.0 + lat.0 as f64, -10.0 + (lat.1 - 1) as f64),
        )
        .with(
            AxisKind::Longitude,
            AxisRange::values(lon.0 as f64, (lon.1 - 1) as f64),
        );
    CacheRequest {
        source_uri: SOURCE.to_string(),
        variable: "tas".to_string(),
        slices: vec![
            (AxisKind::Time, IndexSlice::new(time.0, time.1, 1)),
            (AxisKind::Latitude, IndexSlice::new(lat.0, lat.1, 1)),
            (AxisKind::Longitude, IndexSlice::new(lon.0, lon.1, 1)),
        ],
        extent,
    }
}

/// Write a dataset with the request's shape into a pending entry and finalize it.
async fn materialize(store: &DiskCacheStore, request: &CacheRequest) -> CacheEntry {
    let entry = match store.lookup(request).await.unwrap() {
        CacheLookup::Miss(entry) => entry,
        other => panic!("expected a miss, got {:?}", other),
    };
    assert_eq!(entry.state, EntryState::Pending);

    let lens: Vec<usize> = request.slices.iter().map(|(_, s)| s.len()).collect();
    let chunk = DatasetFixture::tas(0.0, lens[0]).chunk();
    let chunk = grid_io::GridChunk::new(
        request.variable.as_str(),
        vec![
            chunk.axes[0].clone(),
            chunk.axes[1].select(&request.slices[1].1),
            chunk.axes[2].select(&request.slices[2].1),
        ],
        vec![1.0; lens.iter().product()],
    )
    .unwrap();

    let mut writer = store.create_writer(&entry, AxisKind::Time).await.unwrap();
    writer.append(&chunk).unwrap();
    writer.finish().unwrap();
    store.finalize(&entry, &entry.local_path).await.unwrap()
}

#[tokio::test]
async fn test_miss_then_hit() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path(), u64::MAX, false).await;
    let req = request((0, 4), (0, 10), (0, 20));

    let entry = materialize(&store, &req).await;
    assert!(entry.is_materialized());
    assert!(entry.size_bytes > 0);
    assert!(entry.local_path.starts_with(dir.path()));

    let before = entry.last_accessed;
    match store.lookup(&req).await.unwrap() {
        CacheLookup::Hit(hit) => {
            assert_eq!(hit.key, entry.key);
            let refreshed = store.catalog().get(&hit.key).await.unwrap().unwrap();
            assert!(refreshed.last_accessed >= before);
        }
        other => panic!("expected a hit, got {:?}", other),
    }

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.materialized, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.used_bytes, entry.size_bytes);
}

#[tokio::test]
async fn test_missing_file_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path(), u64::MAX, false).await;
    let req = request((0, 2), (0, 5), (0, 5));

    let entry = materialize(&store, &req).await;
    std::fs::remove_dir_all(&entry.local_path).unwrap();

    match store.lookup(&req).await.unwrap() {
        CacheLookup::Miss(again) => {
            assert_eq!(again.key, entry.key);
            assert_eq!(again.state, EntryState::Pending);
        }
        other => panic!("expected a miss, got {:?}", other),
    }
    assert_eq!(store.stats().await.unwrap().used_bytes, 0);
}

#[tokio::test]
async fn test_time_length_mismatch_invalidates_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path(), u64::MAX, false).await;
    let req = request((0, 3), (0, 5), (0, 5));

    let entry = match store.lookup(&req).await.unwrap() {
        CacheLookup::Miss(e) => e,
        other => panic!("expected a miss, got {:?}", other),
    };
    // Two time steps where three were requested
    DatasetFixture::tas(0.0, 2).write(&entry.local_path);
    store.finalize(&entry, &entry.local_path).await.unwrap();

    assert!(matches!(store.lookup(&req).await.unwrap(), CacheLookup::Miss(_)));
    assert!(!entry.local_path.exists());
}

#[tokio::test]
async fn test_unreadable_file_is_access_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path(), u64::MAX, false).await;
    let req = request((0, 2), (0, 5), (0, 5));

    let entry = store.pending(&req).await.unwrap();
    std::fs::create_dir_all(&entry.local_path).unwrap();
    std::fs::write(entry.local_path.join("zarr.json"), b"not json").unwrap();
    store.catalog().mark_materialized(&entry.key, 8).await.unwrap();

    let err = store.lookup(&req).await.unwrap_err();
    assert!(matches!(err, GridError::Access { .. }), "{:?}", err);
    assert!(err.is_retryable());
}

fn with_variable(mut request: CacheRequest, variable: &str) -> CacheRequest {
    request.variable = variable.to_string();
    request
}

#[tokio::test]
async fn test_other_variable_takes_over_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path(), u64::MAX, false).await;
    let tas = request((0, 2), (0, 5), (0, 5));
    let pr = with_variable(tas.clone(), "pr");

    let tas_entry = materialize(&store, &tas).await;
    let pr_entry = materialize(&store, &pr).await;
    assert_eq!(pr_entry.key, tas_entry.key);
    assert_eq!(pr_entry.variable, "pr");

    match store.lookup(&pr).await.unwrap() {
        CacheLookup::Hit(hit) => assert_eq!(hit.variable, "pr"),
        other => panic!("expected a hit, got {:?}", other),
    }

    // Going back to the first variable is a plain miss
    match store.lookup(&tas).await.unwrap() {
        CacheLookup::Miss(entry) => {
            assert_eq!(entry.variable, "tas");
            assert_eq!(entry.state, EntryState::Pending);
        }
        other => panic!("expected a miss, got {:?}", other),
    }
    assert!(!tas_entry.local_path.exists());
}

#[tokio::test]
async fn test_pending_record_follows_new_variable() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path(), u64::MAX, false).await;
    let tas = request((0, 2), (0, 5), (0, 5));

    let first = store.pending(&tas).await.unwrap();
    let second = store.pending(&with_variable(tas, "pr")).await.unwrap();
    assert_eq!(second.key, first.key);
    assert_eq!(second.variable, "pr");
    assert!(second.dimensions.starts_with("pr!"));
}

#[tokio::test]
async fn test_file_without_variable_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path(), u64::MAX, false).await;
    let pr = with_variable(request((0, 2), (0, 5), (0, 5)), "pr");

    let entry = store.pending(&pr).await.unwrap();
    DatasetFixture::tas(0.0, 2).write(&entry.local_path);
    store.finalize(&entry, &entry.local_path).await.unwrap();

    assert!(matches!(store.lookup(&pr).await.unwrap(), CacheLookup::Miss(_)));
    assert!(!entry.local_path.exists());
}

#[tokio::test]
async fn test_contained_hit() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path(), u64::MAX, false).await;
    let large = materialize(&store, &request((0, 6), (0, 20), (0, 40))).await;

    let small = request((1, 3), (5, 10), (10, 20));
    match store.lookup(&small).await.unwrap() {
        CacheLookup::Contained(entry) => assert_eq!(entry.key, large.key),
        other => panic!("expected a contained hit, got {:?}", other),
    }
    // No pending record is created for a contained hit
    assert_eq!(store.stats().await.unwrap().pending, 0);

    // A different time window is not served by the larger entry
    let later = request((4, 8), (5, 10), (10, 20));
    assert!(matches!(store.lookup(&later).await.unwrap(), CacheLookup::Miss(_)));
}

#[tokio::test]
async fn test_reserve_evicts_least_recently_used() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = store_in(dir.path(), u64::MAX, false).await;

    let a = materialize(&store, &request((0, 2), (0, 5), (0, 5))).await;
    let b = materialize(&store, &request((2, 4), (0, 5), (0, 5))).await;
    let c = materialize(&store, &request((4, 6), (0, 5), (0, 5))).await;

    let t0 = Utc::now();
    store.catalog().touch(&a.key, t0 + Duration::seconds(3)).await.unwrap();
    store.catalog().touch(&b.key, t0 + Duration::seconds(1)).await.unwrap();
    store.catalog().touch(&c.key, t0 + Duration::seconds(2)).await.unwrap();

    let used = store.stats().await.unwrap().used_bytes;
    assert_eq!(used, a.size_bytes + b.size_bytes + c.size_bytes);

    // Re-open with a bound equal to current usage
    let catalog = store.catalog().clone();
    store = DiskCacheStore::with_catalog(
        CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            max_bytes: used,
            ..Default::default()
        },
        ZarrWriteOptions::uncompressed(),
        catalog,
    );

    let outcome = store.reserve(1).await.unwrap();
    assert!(outcome.satisfied);
    assert_eq!(outcome.evicted, 1);
    assert_eq!(outcome.freed, b.size_bytes);
    assert!(!b.local_path.exists());
    assert!(store.catalog().get(&b.key).await.unwrap().is_none());
    assert!(a.local_path.exists() && c.local_path.exists());

    let after = store.stats().await.unwrap();
    assert!(after.used_bytes + 1 <= after.max_bytes);

    // Fits without eviction
    let outcome = store.reserve(0).await.unwrap();
    assert_eq!(outcome.evicted, 0);
}

#[tokio::test]
async fn test_pending_entries_survive_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path(), 1, false).await;

    let done = materialize(&store, &request((0, 2), (0, 5), (0, 5))).await;
    let waiting = store.pending(&request((2, 4), (0, 5), (0, 5))).await.unwrap();

    let outcome = store.reserve(1_000_000).await.unwrap();
    assert!(!outcome.satisfied);
    assert_eq!(outcome.evicted, 1);
    assert!(!done.local_path.exists());

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.materialized, 0);
    assert_eq!(stats.pending, 1);
    assert!(store.catalog().get(&waiting.key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_strict_capacity_fails() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path(), 100, true).await;

    let err = store.reserve(101).await.unwrap_err();
    match err {
        GridError::CapacityExceeded { required, available } => {
            assert_eq!(required, 101);
            assert_eq!(available, 100);
        }
        other => panic!("expected capacity error, got {:?}", other),
    }
    assert!(store.reserve(100).await.unwrap().satisfied);
}

#[tokio::test]
async fn test_estimate_required_space() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path(), u64::MAX, false).await;
    let a = request((0, 2), (0, 5), (0, 5));
    let b = request((0, 10), (0, 10), (0, 10));
    assert_eq!(store.estimate_required_space(&[&a, &b]), (50 + 1000) * 4);
}

#[tokio::test]
async fn test_abandon_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path(), u64::MAX, false).await;

    let kept = materialize(&store, &request((0, 2), (0, 5), (0, 5))).await;
    let partial = store.pending(&request((2, 4), (0, 5), (0, 5))).await.unwrap();
    let mut writer = store.create_writer(&partial, AxisKind::Time).await.unwrap();
    writer.append(&DatasetFixture::tas(2.0, 2).chunk()).unwrap();
    store.abandon(&partial, writer).await;
    assert!(!partial.local_path.exists());
    assert_eq!(
        store.catalog().get(&partial.key).await.unwrap().unwrap().state,
        EntryState::Pending
    );

    assert!(store.invalidate(&kept.key).await.unwrap());
    assert!(!kept.local_path.exists());
    assert!(!store.invalidate(&kept.key).await.unwrap());

    assert_eq!(store.clear().await.unwrap(), 1);
    assert!(store.entries().await.unwrap().is_empty());
}
