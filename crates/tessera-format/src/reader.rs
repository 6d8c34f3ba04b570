//! Read side of a container

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::codec::{checksum, decode_chunk};
use crate::error::{ContainerError, ContainerResult};
use crate::index::{ChunkEntry, DatasetInfo, DatasetLayout, Node, NodeId, NodeTable};
use crate::superblock::Superblock;

/// Decode chunk `chunk` described by `entry`; unwritten chunks are all NaN
pub(crate) fn read_chunk<R: Read + Seek>(
    reader: &mut R,
    entry: &ChunkEntry,
    layout: &DatasetLayout,
    chunk: u64,
) -> ContainerResult<Vec<f64>> {
    let element_count = layout.chunk_len(chunk) as usize;
    if !entry.is_stored() {
        return Ok(vec![f64::NAN; element_count]);
    }

    let mut stored = vec![0u8; entry.stored_size as usize];
    reader.seek(SeekFrom::Start(entry.offset))?;
    reader.read_exact(&mut stored)?;

    let actual = checksum(&stored);
    if actual != entry.checksum {
        return Err(ContainerError::ChecksumMismatch {
            context: format!("chunk {chunk} at offset {}", entry.offset),
            expected: hex::encode(entry.checksum),
            actual: hex::encode(actual),
        });
    }

    decode_chunk(&stored, &layout.pipeline, element_count)
}

/// Finalized container opened for reading
#[derive(Debug)]
pub struct ContainerReader {
    path: PathBuf,
    file: BufReader<File>,
    table: NodeTable,
}

impl ContainerReader {
    /// Open and validate a finalized container
    ///
    /// # Errors
    ///
    /// `NotFinalized` if the writer never completed, checksum or magic
    /// errors for damaged files.
    pub fn open(path: impl AsRef<Path>) -> ContainerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = BufReader::new(File::open(&path)?);

        let superblock = Superblock::read_from(&mut file)?;
        if !superblock.is_finalized() {
            return Err(ContainerError::NotFinalized);
        }

        let length = usize::try_from(superblock.index_length).map_err(|_| {
            ContainerError::InvalidLayout(format!("index of {} bytes", superblock.index_length))
        })?;
        let mut index = vec![0u8; length];
        file.seek(SeekFrom::Start(superblock.index_offset))?;
        file.read_exact(&mut index)?;
        superblock.verify_index(&index)?;

        let table = NodeTable::from_bytes(&index)?;
        debug!(path = %path.display(), nodes = table.len(), "opened container");

        Ok(Self { path, file, table })
    }

    /// Path of the container file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The full node table
    pub fn table(&self) -> &NodeTable {
        &self.table
    }

    /// The root group
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Node for `id`
    pub fn node(&self, id: NodeId) -> ContainerResult<&Node> {
        self.table.get(id)
    }

    /// Child `name` of `parent`
    pub fn child(&self, parent: NodeId, name: &str) -> ContainerResult<NodeId> {
        self.table.child(parent, name).ok_or_else(|| {
            ContainerError::UnknownNode(format!("{}/{name}", self.table.path(parent).trim_end_matches('/')))
        })
    }

    /// Children of `parent` in creation order
    pub fn children(&self, parent: NodeId) -> Vec<NodeId> {
        self.table.children(parent)
    }

    /// Resolve a slash-separated path
    pub fn lookup(&self, path: &str) -> ContainerResult<NodeId> {
        self.table
            .lookup(path)
            .ok_or_else(|| ContainerError::UnknownNode(path.to_string()))
    }

    /// String attribute `name` of `node`
    pub fn attribute(&self, node: NodeId, name: &str) -> ContainerResult<Option<&str>> {
        Ok(self.table.get(node)?.attribute(name))
    }

    /// Dataset geometry and chunk table
    pub fn dataset_info(&self, node: NodeId) -> ContainerResult<&DatasetInfo> {
        self.table
            .get(node)?
            .dataset()
            .ok_or_else(|| ContainerError::NotADataset(self.table.path(node)))
    }

    /// Read elements `offset..offset + len` of `dataset`
    pub fn read_range(&mut self, dataset: NodeId, offset: u64, len: u64) -> ContainerResult<Vec<f64>> {
        let info = self.dataset_info(dataset)?.clone();
        let layout = info.layout;

        let end = offset
            .checked_add(len)
            .filter(|end| *end <= layout.length)
            .ok_or_else(|| ContainerError::OutOfBounds {
                dataset: self.table.path(dataset),
                offset,
                end: offset.saturating_add(len),
                length: layout.length,
            })?;

        let mut out = Vec::with_capacity(len as usize);
        if len == 0 {
            return Ok(out);
        }

        let first_chunk = offset / layout.chunk_length;
        let last_chunk = (end - 1) / layout.chunk_length;
        for chunk in first_chunk..=last_chunk {
            let chunk_start = chunk * layout.chunk_length;
            let chunk_len = layout.chunk_len(chunk);
            let lo = offset.max(chunk_start) - chunk_start;
            let hi = end.min(chunk_start + chunk_len) - chunk_start;

            let elements = read_chunk(&mut self.file, &info.chunks[chunk as usize], &layout, chunk)?;
            out.extend_from_slice(&elements[lo as usize..hi as usize]);
        }

        Ok(out)
    }

    /// Read every element of `dataset`
    pub fn read_all(&mut self, dataset: NodeId) -> ContainerResult<Vec<f64>> {
        let length = self.dataset_info(dataset)?.layout.length;
        self.read_range(dataset, 0, length)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::FilterPipeline;
    use crate::writer::{ContainerOptions, ContainerWriter};
    use tempfile::TempDir;

    #[test]
    fn test_unfinalized_container_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("partial.tsra");

        // A superblock without an index, as left behind by a crash.
        let mut file = File::create(&path).expect("create");
        Superblock::unfinalized().write_to(&mut file).expect("superblock");
        drop(file);

        assert!(matches!(
            ContainerReader::open(&path),
            Err(ContainerError::NotFinalized)
        ));
    }

    #[test]
    fn test_corrupt_chunk_detected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("corrupt.tsra");

        let mut writer = ContainerWriter::create(&path, ContainerOptions::default()).expect("create");
        let dataset = writer
            .create_dataset(
                NodeId::ROOT,
                "d",
                DatasetLayout {
                    length: 4,
                    chunk_length: 4,
                    pipeline: FilterPipeline::none(),
                },
            )
            .expect("dataset");
        writer.write_range(dataset, 0, &[1.0, 2.0, 3.0, 4.0]).expect("write");
        writer.finalize().expect("finalize");

        // Flip a byte of the first (only) chunk payload.
        let mut bytes = std::fs::read(&path).expect("read");
        bytes[crate::superblock::SUPERBLOCK_SIZE as usize] ^= 0xFF;
        std::fs::write(&path, bytes).expect("write back");

        let mut reader = ContainerReader::open(&path).expect("open");
        assert!(matches!(
            reader.read_all(dataset),
            Err(ContainerError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_read_range_bounds() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("bounds.tsra");

        let mut writer = ContainerWriter::create(&path, ContainerOptions::default()).expect("create");
        let group = writer.create_group(NodeId::ROOT, "g").expect("group");
        writer
            .create_dataset(
                group,
                "d",
                DatasetLayout {
                    length: 5,
                    chunk_length: 2,
                    pipeline: FilterPipeline::default(),
                },
            )
            .expect("dataset");
        writer.finalize().expect("finalize");

        let mut reader = ContainerReader::open(&path).expect("open");
        let dataset = reader.lookup("/g/d").expect("lookup");
        assert!(reader.read_range(dataset, 4, 2).is_err());
        assert!(reader.read_range(dataset, 5, 0).expect("empty").is_empty());
        assert!(reader.read_all(dataset).expect("all").iter().all(|v| v.is_nan()));
        assert!(matches!(reader.child(group, "missing"), Err(ContainerError::UnknownNode(_))));
        assert!(reader.dataset_info(group).is_err());
    }
}
