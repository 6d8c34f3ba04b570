//! Chunked, compressed container files for periodic time-series data
//!
//! A container holds a tree of named groups and `f64` datasets. Groups
//! and datasets carry string attributes; datasets are split into
//! fixed-length chunks that are encoded independently (byte shuffle, then
//! deflate), so any contiguous element range can be rewritten without
//! touching the rest of the dataset.
//!
//! # Layout
//!
//! - **Superblock** (40 bytes): magic, version, finalized flag and the
//!   location and checksum of the index
//! - **Chunk payloads**: appended as chunks are flushed; a rewritten chunk
//!   reuses its slot when the new encoding fits
//! - **Index**: the node tree with attributes and chunk tables, written once
//!   at finalize
//!
//! A file whose superblock is not flagged finalized has no usable index and
//! is rejected by [`ContainerReader`].
//!
//! # Example
//!
//! ```rust,no_run
//! use tessera_format::{ContainerOptions, ContainerReader, ContainerWriter, DatasetLayout, FilterPipeline};
//!
//! # fn example() -> Result<(), tessera_format::ContainerError> {
//! let mut writer = ContainerWriter::create("day.tsra", ContainerOptions::default())?;
//! let group = writer.create_group(writer.root(), "SAMPLE_LOCAL")?;
//! writer.set_attribute(group, "properties", "{}")?;
//! let dataset = writer.create_dataset(
//!     group,
//!     "dataset_1_s",
//!     DatasetLayout { length: 86_400, chunk_length: 7_200, pipeline: FilterPipeline::default() },
//! )?;
//! writer.write_range(dataset, 0, &[1.0, 2.0, 3.0])?;
//! writer.finalize()?;
//!
//! let mut reader = ContainerReader::open("day.tsra")?;
//! let dataset = reader.lookup("/SAMPLE_LOCAL/dataset_1_s")?;
//! let head = reader.read_range(dataset, 0, 3)?;
//! assert_eq!(head, vec![1.0, 2.0, 3.0]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod codec;
mod error;
mod index;
mod reader;
mod superblock;
mod writer;

pub use codec::FilterPipeline;
pub use error::{ContainerError, ContainerResult};
pub use index::{
    ChunkEntry, DatasetInfo, DatasetLayout, MAX_ATTRIBUTES, MAX_NAME_LEN, MAX_VALUE_LEN, Node, NodeId,
    NodeKind, NodeTable,
};
pub use reader::ContainerReader;
pub use superblock::{CONTAINER_MAGIC, CONTAINER_VERSION, SUPERBLOCK_SIZE, Superblock};
pub use writer::{ContainerOptions, ContainerWriter, DEFAULT_CACHE_BYTES, Storage};
