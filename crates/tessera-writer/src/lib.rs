//! Periodic, chunked, compressed time-series writer
//!
//! Persists numeric sample streams into one container file per time period.
//! A host declares the time series of a period up front as
//! [`CatalogItem`]s; the writer lays them out as a
//! catalog / resource / representation tree of chunked `f64` datasets and
//! then routes successive sample blocks into them at element offsets
//! derived from the time offset within the period.
//!
//! # Components
//!
//! - [`planner`]: chunk geometry from the period length and sample period
//! - [`namespace`]: physical group/dataset tree and its metadata attributes
//! - [`session`]: one open file for one period (`Idle -> Open -> Closed`)
//! - [`dispatch`]: grouping, offset computation and bounded-range writes
//! - [`backend`]: the storage capability, implemented over `tessera-format`
//!   and, with the `hdf5` feature, over HDF5 files
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use chrono::{TimeZone, Utc};
//! use tessera_writer::{
//!     CancellationToken, Catalog, CatalogItem, DataWriter, Representation, Resource,
//!     WriteRequest, WriterConfig,
//! };
//!
//! # async fn example() -> tessera_writer::Result<()> {
//! let writer = DataWriter::new(WriterConfig::new("./data"))?;
//! let item = CatalogItem::new(
//!     Arc::new(Catalog::new("/SAMPLE/LOCAL")),
//!     Arc::new(Resource::new("T1")),
//!     Representation::new("1_s", Duration::from_secs(1)),
//! );
//!
//! let cancel = CancellationToken::new();
//! let begin = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
//! let mut session = writer
//!     .open(begin, Duration::from_secs(86_400), Duration::from_secs(1), &[item.clone()], &cancel)
//!     .await?;
//!
//! let request = WriteRequest::new(item, vec![21.5; 600]);
//! session.write(Duration::ZERO, vec![request], |_| {}, &cancel).await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backend;
mod cancel;
pub mod catalog;
mod config;
pub mod dispatch;
mod error;
#[cfg(feature = "hdf5")]
pub mod h5;
pub mod namespace;
pub mod naming;
pub mod planner;
pub mod session;
mod writer;

pub use backend::{ContainerBackend, ContainerFile, DatasetSpec, TesseraBackend};
pub use cancel::CancellationToken;
pub use catalog::{Catalog, CatalogItem, Representation, Resource, WriteRequest};
pub use config::WriterConfig;
pub use dispatch::DispatchSummary;
pub use error::{Result, WriterError};
#[cfg(feature = "hdf5")]
pub use h5::{Hdf5Backend, Hdf5File};
pub use namespace::{DatasetIndex, DatasetKey, NamespaceTree};
pub use planner::{ChunkLayout, ChunkPlanner};
pub use session::{FileSession, Period};
pub use writer::DataWriter;
