//! Storage capability used by the write engine
//!
//! The engine only needs a handful of operations from a container: nested
//! groups, string attributes, chunked datasets and offset-addressed range
//! writes. [`ContainerBackend`] creates files, [`ContainerFile`] is one file
//! open for writing. [`TesseraBackend`] is the production adapter over
//! [`tessera_format::ContainerWriter`].

use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::Path;

use tessera_format::{
    ContainerError, ContainerOptions, ContainerWriter, DatasetLayout, FilterPipeline, NodeId,
};

use crate::error::{Result, WriterError};
use crate::planner::ChunkLayout;

/// Shape and filters of a dataset to declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetSpec {
    /// Chunk geometry; the dataset holds `chunk_length * chunk_count` elements
    pub chunks: ChunkLayout,
    /// Filters applied per chunk
    pub pipeline: FilterPipeline,
}

impl DatasetSpec {
    /// Element count of the dataset
    pub fn length(&self) -> u64 {
        self.chunks.total_length()
    }
}

/// Creates container files
pub trait ContainerBackend: Send + Sync + 'static {
    /// One file open for writing
    type File: ContainerFile;

    /// Create a new file at `path`
    ///
    /// Must fail with [`WriterError::FileExists`] rather than overwrite or
    /// append to an existing file.
    fn create(&self, path: &Path) -> Result<Self::File>;
}

/// A container file open for writing
///
/// Node handles are only valid for the file that returned them.
pub trait ContainerFile: Send + 'static {
    /// Handle to a group or dataset
    type Node: Copy + Debug + Send + Sync + 'static;

    /// Root group
    fn root(&self) -> Self::Node;

    /// Create or open the group `name` under `parent`
    fn create_group(&mut self, parent: Self::Node, name: &str) -> Result<Self::Node>;

    /// Set a scalar string attribute, replacing any previous value
    fn set_attribute(&mut self, node: Self::Node, name: &str, value: &str) -> Result<()>;

    /// Declare a chunked `f64` dataset; unwritten elements read back as NaN
    fn create_dataset(
        &mut self,
        parent: Self::Node,
        name: &str,
        spec: DatasetSpec,
    ) -> Result<Self::Node>;

    /// Write `samples` into the contiguous range starting at element `offset`
    fn write_range(&mut self, dataset: Self::Node, offset: u64, samples: &[f64]) -> Result<()>;

    /// Flush, write the index, sync and release the file
    fn finalize(self) -> Result<()>
    where
        Self: Sized;
}

/// Backend writing Tessera container files
#[derive(Debug, Clone, Copy, Default)]
pub struct TesseraBackend {
    options: ContainerOptions,
}

impl TesseraBackend {
    /// Create a backend with the given container options
    pub fn new(options: ContainerOptions) -> Self {
        Self { options }
    }

    /// Container options applied to every file
    pub fn options(&self) -> ContainerOptions {
        self.options
    }
}

impl ContainerBackend for TesseraBackend {
    type File = ContainerWriter;

    fn create(&self, path: &Path) -> Result<Self::File> {
        ContainerWriter::create(path, self.options).map_err(|e| match e {
            ContainerError::Io(io) if io.kind() == ErrorKind::AlreadyExists => {
                WriterError::FileExists(path.to_path_buf())
            }
            other => other.into(),
        })
    }
}

impl ContainerFile for ContainerWriter {
    type Node = NodeId;

    fn root(&self) -> NodeId {
        ContainerWriter::root(self)
    }

    fn create_group(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        Ok(ContainerWriter::create_group(self, parent, name)?)
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<()> {
        Ok(ContainerWriter::set_attribute(self, node, name, value)?)
    }

    fn create_dataset(&mut self, parent: NodeId, name: &str, spec: DatasetSpec) -> Result<NodeId> {
        let layout = DatasetLayout {
            length: spec.length(),
            chunk_length: spec.chunks.chunk_length,
            pipeline: spec.pipeline,
        };
        Ok(ContainerWriter::create_dataset(self, parent, name, layout)?)
    }

    fn write_range(&mut self, dataset: NodeId, offset: u64, samples: &[f64]) -> Result<()> {
        Ok(ContainerWriter::write_range(self, dataset, offset, samples)?)
    }

    fn finalize(self) -> Result<()> {
        Ok(ContainerWriter::finalize(self)?)
    }
}
