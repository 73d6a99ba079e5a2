//! Reading written datasets back through the URI-based accessor.

use grid_common::{AxisKind, IndexSlice};
use grid_io::{AxisCoords, GridChunk, SourceAccessor, ZarrGridWriter, ZarrSourceAccessor, ZarrWriteOptions};

/// `[lat][lon]` block whose values encode their global position.
fn lon_block(lats: &[f64], lons: &[f64]) -> GridChunk {
    let mut data = Vec::new();
    for lat in lats {
        for lon in lons {
            data.push((lat * 1000.0 + lon) as f32);
        }
    }
    GridChunk::new(
        "pr",
        vec![
            AxisCoords::new("lat", lats.to_vec()).with_units("degrees_north"),
            AxisCoords::new("lon", lons.to_vec()).with_units("degrees_east"),
        ],
        data,
    )
    .unwrap()
    .with_units(Some("kg m-2 s-1".to_string()))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_strided_read_across_appended_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pr.zarr");
    let lats = [1.0, 2.0];

    // Tiled along the inner axis, blocks of 3 longitudes
    let mut writer = ZarrGridWriter::create(&path, AxisKind::Longitude, ZarrWriteOptions::default()).unwrap();
    writer.append(&lon_block(&lats, &[0.0, 1.0, 2.0])).unwrap();
    writer.append(&lon_block(&lats, &[3.0, 4.0, 5.0])).unwrap();
    writer.append(&lon_block(&lats, &[6.0, 7.0])).unwrap();
    let written = writer.finish().unwrap();
    assert_eq!(written.shape, vec![2, 8]);

    let uri = format!("file://{}", path.display());
    let handle = ZarrSourceAccessor::default().open(&uri).await.unwrap();
    assert_eq!(handle.uri(), uri);

    let info = handle.variable("pr").unwrap();
    assert_eq!(info.units.as_deref(), Some("kg m-2 s-1"));
    assert_eq!(info.axes[1].kind, AxisKind::Longitude);
    assert_eq!(info.axes[1].values, (0..8).map(f64::from).collect::<Vec<_>>());

    let chunk = handle
        .read("pr", &[IndexSlice::new(1, 2, 1), IndexSlice::new(1, 8, 3)])
        .unwrap();
    assert_eq!(chunk.axes[1].values, vec![1.0, 4.0, 7.0]);
    assert_eq!(chunk.data, vec![2001.0, 2004.0, 2007.0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_variable_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pr.zarr");
    let mut writer = ZarrGridWriter::create(&path, AxisKind::Longitude, ZarrWriteOptions::uncompressed()).unwrap();
    writer.append(&lon_block(&[0.0], &[0.0, 1.0])).unwrap();
    writer.finish().unwrap();

    let handle = ZarrSourceAccessor::default()
        .open(&path.display().to_string())
        .await
        .unwrap();
    let err = handle.variable("tas").err().unwrap();
    assert!(!err.is_open_failure());
    assert!(err.to_string().contains("tas"));
}
