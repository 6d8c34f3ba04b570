#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! End-to-end test of one period file
//!
//! Two catalogs with several resources and representations are written in
//! two blocks of 1000 samples and read back through the container reader.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use tessera_format::ContainerReader;
use tessera_writer::{
    CancellationToken, Catalog, CatalogItem, DataWriter, Representation, Resource, WriteRequest,
    WriterConfig,
};

fn catalog_items() -> Vec<CatalogItem> {
    let period = Duration::from_secs(1);
    let a = Arc::new(Catalog::new("/A/B/C").with_properties(json!({
        "description": "first catalog",
        "units": ["degC", "hPa"],
    })));
    let b = Arc::new(Catalog::new("/D/E/F"));

    let t1 = Arc::new(Resource::new("T1").with_properties(json!({"unit": "degC"})));
    let t2 = Arc::new(Resource::new("T2"));
    let v1 = Arc::new(Resource::new("V1").with_properties(json!({"unit": "m/s"})));

    vec![
        CatalogItem::new(a.clone(), t1.clone(), Representation::new("1_s", period)),
        CatalogItem::new(a.clone(), t1, Representation::new("1_s", period)).with_parameters(
            BTreeMap::from([("window".to_string(), "5".to_string())]),
        ),
        CatalogItem::new(a, t2, Representation::new("1_s", period)),
        CatalogItem::new(b, v1, Representation::new("1_s", period)),
    ]
}

fn buffer(seed: usize) -> Vec<f64> {
    (0..1000).map(|i| (seed * 10_000 + i) as f64 * 0.5).collect()
}

#[tokio::test]
async fn two_blocks_fill_every_dataset() {
    let dir = TempDir::new().expect("tempdir");
    let writer = DataWriter::new(WriterConfig::new(dir.path())).expect("writer");
    let items = catalog_items();
    let cancel = CancellationToken::new();
    let begin = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();

    let mut session = writer
        .open(
            begin,
            Duration::from_secs(2_000),
            Duration::from_secs(1),
            &items,
            &cancel,
        )
        .await
        .expect("open");
    assert_eq!(session.total_length(), 2_000);

    let requests = |items: &[CatalogItem]| -> Vec<WriteRequest> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| WriteRequest::new(item.clone(), buffer(i)))
            .collect()
    };

    for offset in [0, 1_000] {
        let summary = session
            .write(
                Duration::from_secs(offset),
                requests(&items),
                |_| {},
                &cancel,
            )
            .await
            .expect("write");
        assert_eq!(summary.requests, 4);
        assert_eq!(summary.groups, 2);
    }
    session.close().await.expect("close");

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .expect("read dir")
        .map(|entry| entry.expect("entry").file_name().into_string().expect("utf-8"))
        .collect();
    assert_eq!(files, vec!["2020-01-01T00-00-00Z_1_s.tsra"]);

    let mut reader = ContainerReader::open(session.path()).expect("reader");
    let root = reader.root();
    assert_eq!(
        reader.attribute(root, "date_time").expect("attr"),
        Some("2020-01-01T00:00:00Z")
    );
    assert_eq!(reader.attribute(root, "sample_period").expect("attr"), Some("1 s"));
    assert_eq!(reader.children(root).len(), 2);

    let catalog_a = reader.lookup("/A_B_C").expect("catalog A");
    assert_eq!(reader.children(catalog_a).len(), 2);
    let expected = serde_json::to_string_pretty(&json!({
        "description": "first catalog",
        "units": ["degC", "hPa"],
    }))
    .expect("json");
    assert_eq!(
        reader.attribute(catalog_a, "properties").expect("attr"),
        Some(expected.as_str())
    );

    let catalog_b = reader.lookup("/D_E_F").expect("catalog B");
    assert_eq!(reader.attribute(catalog_b, "properties").expect("attr"), None);
    let v1 = reader.lookup("/D_E_F/V1").expect("V1");
    assert_eq!(
        reader.attribute(v1, "properties").expect("attr"),
        Some("{\n  \"unit\": \"m/s\"\n}")
    );
    let t2 = reader.lookup("/A_B_C/T2").expect("T2");
    assert_eq!(reader.attribute(t2, "properties").expect("attr"), None);

    let datasets = [
        "/A_B_C/T1/dataset_1_s",
        "/A_B_C/T1/dataset_1_s(window=5)",
        "/A_B_C/T2/dataset_1_s",
        "/D_E_F/V1/dataset_1_s",
    ];
    for (i, path) in datasets.iter().enumerate() {
        let dataset = reader.lookup(path).expect("dataset");
        let info = reader.dataset_info(dataset).expect("info");
        assert_eq!(info.layout.length, 2_000);
        assert_eq!(info.layout.chunk_length * info.chunks.len() as u64, 2_000);

        let values = reader.read_all(dataset).expect("read");
        let block = buffer(i);
        let twice: Vec<f64> = block.iter().chain(block.iter()).copied().collect();
        assert_eq!(values, twice, "{path}");
    }
}

#[tokio::test]
async fn day_file_uses_exact_chunk_tiling() {
    let dir = TempDir::new().expect("tempdir");
    let writer = DataWriter::new(WriterConfig::new(dir.path())).expect("writer");
    let items = catalog_items();
    let cancel = CancellationToken::new();
    let begin = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();

    let mut session = writer
        .open(
            begin,
            Duration::from_secs(86_400),
            Duration::from_secs(1),
            &items[..1],
            &cancel,
        )
        .await
        .expect("open");

    // A block straddling the boundary between the first two chunks
    let block: Vec<f64> = (0..600).map(f64::from).collect();
    session
        .write(
            Duration::from_secs(7_000),
            vec![WriteRequest::new(items[0].clone(), block.clone())],
            |_| {},
            &cancel,
        )
        .await
        .expect("write");
    session.close().await.expect("close");

    let mut reader = ContainerReader::open(session.path()).expect("reader");
    let dataset = reader.lookup("/A_B_C/T1/dataset_1_s").expect("dataset");
    let info = reader.dataset_info(dataset).expect("info");
    assert_eq!(info.layout.chunk_length, 7_200);
    assert_eq!(info.chunks.len(), 12);
    assert_eq!(info.chunks.iter().filter(|c| c.is_stored()).count(), 2);

    assert_eq!(reader.read_range(dataset, 7_000, 600).expect("read"), block);
    assert!(reader.read_range(dataset, 0, 7_000).expect("read").iter().all(|v| v.is_nan()));
}

#[tokio::test]
async fn large_property_bags_are_stored() {
    let dir = TempDir::new().expect("tempdir");
    let writer = DataWriter::new(WriterConfig::new(dir.path())).expect("writer");
    let notes = "x".repeat(70_000);
    let catalog = Arc::new(Catalog::new("/BIG").with_properties(json!({ "notes": notes })));
    let item = CatalogItem::new(
        catalog,
        Arc::new(Resource::new("T1")),
        Representation::new("1_s", Duration::from_secs(1)),
    );
    let cancel = CancellationToken::new();
    let begin = Utc.with_ymd_and_hms(2020, 1, 3, 0, 0, 0).unwrap();

    let mut session = writer
        .open(
            begin,
            Duration::from_secs(100),
            Duration::from_secs(1),
            std::slice::from_ref(&item),
            &cancel,
        )
        .await
        .expect("open");
    session
        .write(
            Duration::ZERO,
            vec![WriteRequest::new(item, vec![3.0; 100])],
            |_| {},
            &cancel,
        )
        .await
        .expect("write");
    session.close().await.expect("close");

    let mut reader = ContainerReader::open(session.path()).expect("reader");
    let group = reader.lookup("/BIG").expect("catalog");
    let stored = reader
        .attribute(group, "properties")
        .expect("attr")
        .expect("properties present");
    let parsed: serde_json::Value = serde_json::from_str(stored).expect("json");
    assert_eq!(parsed["notes"].as_str().map(str::len), Some(70_000));

    let dataset = reader.lookup("/BIG/T1/dataset_1_s").expect("dataset");
    assert_eq!(reader.read_all(dataset).expect("read"), vec![3.0; 100]);
}
