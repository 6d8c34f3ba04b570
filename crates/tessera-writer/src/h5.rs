//! HDF5 storage backend
//!
//! Writes the same group/attribute/dataset tree as [`TesseraBackend`] into
//! an HDF5 file through the `hdf5` crate, so period files can be read by
//! standard HDF5 tooling. Requires the `hdf5` feature and a system libhdf5.
//!
//! [`TesseraBackend`]: crate::backend::TesseraBackend

use std::path::Path;
use std::str::FromStr;

use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, File, Group, Location};
use ndarray::{ArrayView1, s};
use tracing::{debug, info};

use crate::backend::{ContainerBackend, ContainerFile, DatasetSpec};
use crate::error::{Result, WriterError};

/// Backend writing HDF5 files
#[derive(Debug, Clone, Copy, Default)]
pub struct Hdf5Backend;

impl ContainerBackend for Hdf5Backend {
    type File = Hdf5File;

    fn create(&self, path: &Path) -> Result<Hdf5File> {
        if path.try_exists()? {
            return Err(WriterError::FileExists(path.to_path_buf()));
        }
        let file = File::create_excl(path).map_err(|e| {
            if path.exists() {
                WriterError::FileExists(path.to_path_buf())
            } else {
                e.into()
            }
        })?;
        let root = file.group("/")?;
        info!(path = %path.display(), "created hdf5 file");
        Ok(Hdf5File {
            file,
            nodes: vec![Hdf5Node::Group(root)],
        })
    }
}

enum Hdf5Node {
    Group(Group),
    Dataset(Dataset),
}

impl Hdf5Node {
    fn location(&self) -> &Location {
        match self {
            Self::Group(group) => group,
            Self::Dataset(dataset) => dataset,
        }
    }
}

/// One HDF5 file open for writing
///
/// Nodes are indices into the handles opened through this file.
pub struct Hdf5File {
    file: File,
    nodes: Vec<Hdf5Node>,
}

impl std::fmt::Debug for Hdf5File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hdf5File")
            .field("file", &self.file.filename())
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl Hdf5File {
    fn group(&self, node: usize) -> Result<&Group> {
        match self.nodes.get(node) {
            Some(Hdf5Node::Group(group)) => Ok(group),
            Some(Hdf5Node::Dataset(dataset)) => Err(WriterError::InvalidRequest(format!(
                "{} is not a group",
                dataset.name()
            ))),
            None => Err(WriterError::InvalidRequest(format!("unknown node #{node}"))),
        }
    }

    fn dataset(&self, node: usize) -> Result<&Dataset> {
        match self.nodes.get(node) {
            Some(Hdf5Node::Dataset(dataset)) => Ok(dataset),
            Some(Hdf5Node::Group(group)) => Err(WriterError::UnknownDataset(group.name())),
            None => Err(WriterError::UnknownDataset(format!("#{node}"))),
        }
    }

    fn push(&mut self, node: Hdf5Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| WriterError::InvalidRequest(format!("invalid attribute string: {e}")))
}

impl ContainerFile for Hdf5File {
    type Node = usize;

    fn root(&self) -> usize {
        0
    }

    fn create_group(&mut self, parent: usize, name: &str) -> Result<usize> {
        let parent = self.group(parent)?;
        let group = if parent.link_exists(name) {
            parent.group(name)?
        } else {
            parent.create_group(name)?
        };
        debug!(path = %group.name(), "created group");
        Ok(self.push(Hdf5Node::Group(group)))
    }

    fn set_attribute(&mut self, node: usize, name: &str, value: &str) -> Result<()> {
        let location = self
            .nodes
            .get(node)
            .ok_or_else(|| WriterError::InvalidRequest(format!("unknown node #{node}")))?
            .location();
        let value = to_var_len_unicode(value)?;
        let attribute = if location.attr_names()?.iter().any(|existing| existing == name) {
            location.attr(name)?
        } else {
            location.new_attr::<VarLenUnicode>().create(name)?
        };
        attribute.write_scalar(&value)?;
        Ok(())
    }

    fn create_dataset(&mut self, parent: usize, name: &str, spec: DatasetSpec) -> Result<usize> {
        let parent = self.group(parent)?;
        let mut builder = parent
            .new_dataset::<f64>()
            .shape((spec.length() as usize,))
            .chunk((spec.chunks.chunk_length as usize,))
            .fill_value(f64::NAN);
        if spec.pipeline.shuffle {
            builder = builder.shuffle();
        }
        if let Some(level) = spec.pipeline.deflate_level {
            builder = builder.deflate(level);
        }
        let dataset = builder.create(name)?;
        debug!(
            path = %dataset.name(),
            length = spec.length(),
            chunk_length = spec.chunks.chunk_length,
            "created dataset"
        );
        Ok(self.push(Hdf5Node::Dataset(dataset)))
    }

    fn write_range(&mut self, dataset: usize, offset: u64, samples: &[f64]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let dataset = self.dataset(dataset)?;
        let offset = offset as usize;
        let end = offset + samples.len();
        let length = dataset.size();
        if end > length {
            return Err(WriterError::OutOfBounds {
                dataset: dataset.name(),
                offset: offset as u64,
                end: end as u64,
                length: length as u64,
            });
        }
        dataset.write_slice(ArrayView1::from(samples), s![offset..end])?;
        Ok(())
    }

    fn finalize(self) -> Result<()> {
        self.file.flush()?;
        let path = self.file.filename();
        // Handles close on drop; the file closes with its last handle
        drop(self.nodes);
        drop(self.file);
        info!(path = %path, "finalized hdf5 file");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::planner::ChunkLayout;
    use tempfile::TempDir;
    use tessera_format::FilterPipeline;

    fn spec() -> DatasetSpec {
        DatasetSpec {
            chunks: ChunkLayout {
                chunk_length: 4,
                chunk_count: 3,
            },
            pipeline: FilterPipeline::default(),
        }
    }

    #[test]
    fn test_existing_file_maps_to_file_exists() {
        let dir = TempDir::new().expect("Test operation should succeed");
        let path = dir.path().join("taken.h5");
        std::fs::write(&path, b"not hdf5").expect("Test operation should succeed");

        let result = Hdf5Backend.create(&path);
        assert!(matches!(result, Err(WriterError::FileExists(p)) if p == path));
        assert_eq!(
            std::fs::read(&path).expect("Test operation should succeed"),
            b"not hdf5"
        );
    }

    #[test]
    fn test_tree_and_ranges_round_trip() {
        let dir = TempDir::new().expect("Test operation should succeed");
        let path = dir.path().join("period.h5");

        let mut file = Hdf5Backend.create(&path).expect("Test operation should succeed");
        let root = file.root();
        file.set_attribute(root, "sample_period", "1 s")
            .expect("Test operation should succeed");
        let group = file
            .create_group(root, "A_B_C")
            .expect("Test operation should succeed");
        let again = file
            .create_group(root, "A_B_C")
            .expect("Test operation should succeed");
        file.set_attribute(again, "properties", "{}")
            .expect("Test operation should succeed");
        file.set_attribute(again, "properties", "{\"a\": 1}")
            .expect("Test operation should succeed");
        let dataset = file
            .create_dataset(group, "dataset_1_s", spec())
            .expect("Test operation should succeed");
        file.write_range(dataset, 2, &[1.0, 2.0, 3.0])
            .expect("Test operation should succeed");
        assert!(matches!(
            file.write_range(dataset, 10, &[1.0, 2.0, 3.0]),
            Err(WriterError::OutOfBounds { end: 13, length: 12, .. })
        ));
        file.finalize().expect("Test operation should succeed");

        let file = File::open(&path).expect("Test operation should succeed");
        let sample_period: VarLenUnicode = file
            .attr("sample_period")
            .and_then(|attr| attr.read_scalar())
            .expect("Test operation should succeed");
        assert_eq!(sample_period.as_str(), "1 s");

        let group = file.group("A_B_C").expect("Test operation should succeed");
        let properties: VarLenUnicode = group
            .attr("properties")
            .and_then(|attr| attr.read_scalar())
            .expect("Test operation should succeed");
        assert_eq!(properties.as_str(), "{\"a\": 1}");

        let values: Vec<f64> = group
            .dataset("dataset_1_s")
            .and_then(|dataset| dataset.read_raw())
            .expect("Test operation should succeed");
        assert_eq!(values.len(), 12);
        assert_eq!(&values[2..5], &[1.0, 2.0, 3.0]);
        assert!(values[0].is_nan() && values[11].is_nan());
    }
}
