//! Write one hour of synthetic 1 Hz data in one-minute blocks
//!
//! Run with `RUST_LOG=tessera_writer=debug` to see every dispatched block.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DurationRound, TimeDelta, Utc};
use serde_json::json;
use tessera_format::ContainerReader;
use tessera_writer::{
    CancellationToken, Catalog, CatalogItem, DataWriter, Representation, Resource, WriteRequest,
    WriterConfig,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Tessera Period Writer Example ===\n");

    let output_dir = std::env::temp_dir().join("tessera-example");
    let writer = DataWriter::new(WriterConfig::new(&output_dir))?;

    let catalog = Arc::new(Catalog::new("/SAMPLE/LOCAL").with_properties(json!({
        "description": "synthetic weather station",
    })));
    let sample_period = Duration::from_secs(1);
    let items: Vec<CatalogItem> = ["T1", "P1"]
        .into_iter()
        .map(|id| {
            CatalogItem::new(
                Arc::clone(&catalog),
                Arc::new(Resource::new(id)),
                Representation::new("1_s", sample_period),
            )
        })
        .collect();

    let begin = Utc::now().duration_trunc(TimeDelta::hours(1))?;
    let cancel = CancellationToken::new();
    let mut session = writer
        .open(begin, Duration::from_secs(3_600), sample_period, &items, &cancel)
        .await?;
    println!("1. Opened {}", session.path().display());

    for minute in 0..60u64 {
        let requests = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let samples = (0..60)
                    .map(|s| ((minute * 60 + s) as f64 / 600.0).sin() + i as f64 * 10.0)
                    .collect();
                WriteRequest::new(item.clone(), samples)
            })
            .collect();
        session
            .write(Duration::from_secs(minute * 60), requests, |_| {}, &cancel)
            .await?;
    }
    println!("2. Wrote 60 blocks of 60 samples per series");

    session.close().await?;
    println!("3. Closed file");

    let mut reader = ContainerReader::open(session.path())?;
    let dataset = reader.lookup("/SAMPLE_LOCAL/T1/dataset_1_s")?;
    let head = reader.read_range(dataset, 0, 5)?;
    println!("\n4. First samples of T1: {head:?}");

    Ok(())
}
