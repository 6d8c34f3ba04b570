//! Write side of a container
//!
//! A [`ContainerWriter`] owns the open file, the node table and a cache of
//! decoded chunks that received writes but have not been encoded yet.
//! Node handles ([`NodeId`]) are only meaningful through the writer that
//! issued them, so the file and every node are released together when the
//! writer is finalized or dropped.
//!
//! Chunk payloads are appended after the superblock. A rewritten chunk whose
//! new encoding fits in its previous slot is written in place; otherwise it
//! moves to the end of the file and the old slot is left unused.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::codec::{ELEMENT_SIZE, checksum, encode_chunk};
use crate::error::{ContainerError, ContainerResult};
use crate::index::{
    ChunkEntry, DatasetInfo, DatasetLayout, MAX_ATTRIBUTES, Node, NodeId, NodeKind, NodeTable,
    check_name, check_value,
};
use crate::reader::read_chunk;
use crate::superblock::{SUPERBLOCK_SIZE, Superblock};

/// Default budget for decoded dirty chunks (16 MiB)
pub const DEFAULT_CACHE_BYTES: usize = 16 * 1024 * 1024;

/// Options for creating a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerOptions {
    /// Bytes of decoded chunk data kept in memory before the oldest dirty
    /// chunks are encoded and written out; 0 writes every chunk through
    pub cache_bytes: usize,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            cache_bytes: DEFAULT_CACHE_BYTES,
        }
    }
}

/// Byte store a container is written to
pub trait Storage: Read + Write + Seek {
    /// Make everything written so far durable
    fn sync(&mut self) -> io::Result<()>;
}

impl Storage for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

type ChunkKey = (NodeId, u64);

/// Decoded chunks with pending modifications, oldest first
#[derive(Debug, Default)]
struct ChunkCache {
    chunks: HashMap<ChunkKey, Vec<f64>>,
    order: VecDeque<ChunkKey>,
    bytes: usize,
}

impl ChunkCache {
    fn take(&mut self, key: ChunkKey) -> Option<Vec<f64>> {
        let elements = self.chunks.remove(&key)?;
        self.order.retain(|queued| *queued != key);
        self.bytes -= elements.len() * ELEMENT_SIZE;
        Some(elements)
    }

    fn put(&mut self, key: ChunkKey, elements: Vec<f64>) {
        self.bytes += elements.len() * ELEMENT_SIZE;
        if let Some(previous) = self.chunks.insert(key, elements) {
            self.bytes -= previous.len() * ELEMENT_SIZE;
        } else {
            self.order.push_back(key);
        }
    }

    fn pop_oldest(&mut self) -> Option<(ChunkKey, Vec<f64>)> {
        let key = self.order.pop_front()?;
        let elements = self.chunks.remove(&key)?;
        self.bytes -= elements.len() * ELEMENT_SIZE;
        Some((key, elements))
    }

    /// Put back a chunk taken by `pop_oldest` as the oldest entry
    fn restore(&mut self, key: ChunkKey, elements: Vec<f64>) {
        self.bytes += elements.len() * ELEMENT_SIZE;
        self.chunks.insert(key, elements);
        self.order.push_front(key);
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.order.clear();
        self.bytes = 0;
    }
}

/// Container file open for writing
#[derive(Debug)]
pub struct ContainerWriter<S: Storage = File> {
    path: PathBuf,
    /// `None` once finalized
    file: Option<S>,
    table: NodeTable,
    cache: ChunkCache,
    options: ContainerOptions,
    /// Where the next chunk payload goes
    end_offset: u64,
}

impl ContainerWriter<File> {
    /// Create a new container at `path`
    ///
    /// # Errors
    ///
    /// Fails with `Io` (kind `AlreadyExists`) if `path` exists: containers
    /// are never overwritten or appended to.
    pub fn create(path: impl AsRef<Path>, options: ContainerOptions) -> ContainerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        Self::with_storage(path, file, options)
    }
}

impl<S: Storage> ContainerWriter<S> {
    /// Start a new container in `storage`, overwriting it from the start
    ///
    /// `path` only names the container in logs and errors.
    pub fn with_storage(
        path: impl Into<PathBuf>,
        mut storage: S,
        options: ContainerOptions,
    ) -> ContainerResult<Self> {
        let path = path.into();
        storage.seek(SeekFrom::Start(0))?;
        Superblock::unfinalized().write_to(&mut storage)?;
        info!(path = %path.display(), "created container");

        Ok(Self {
            path,
            file: Some(storage),
            table: NodeTable::new(),
            cache: ChunkCache::default(),
            options,
            end_offset: SUPERBLOCK_SIZE,
        })
    }

    /// Path of the container file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The root group
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Current node table
    pub fn table(&self) -> &NodeTable {
        &self.table
    }

    /// Create the group `name` under `parent`, or return it if it exists
    pub fn create_group(&mut self, parent: NodeId, name: &str) -> ContainerResult<NodeId> {
        self.ensure_open()?;
        self.ensure_group(parent)?;
        check_name(name)?;

        if let Some(existing) = self.table.child(parent, name) {
            return if self.table.get(existing)?.is_group() {
                Ok(existing)
            } else {
                Err(ContainerError::NotAGroup(self.table.path(existing)))
            };
        }

        let id = self.table.push(Node {
            name: name.to_string(),
            parent: Some(parent),
            attributes: Vec::new(),
            kind: NodeKind::Group,
        });
        debug!(path = %self.table.path(id), "created group");
        Ok(id)
    }

    /// Set string attribute `name` on `node`, replacing any previous value
    ///
    /// # Errors
    ///
    /// `InvalidName` or `InvalidAttribute` when the name, the value or the
    /// attribute count does not fit the index; the node is unchanged then.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> ContainerResult<()> {
        self.ensure_open()?;
        check_name(name)?;
        check_value(value)?;
        let node = self.table.get_mut(node)?;
        let attribute_count = node.attributes.len();

        match node.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None if attribute_count >= MAX_ATTRIBUTES => {
                return Err(ContainerError::InvalidAttribute(format!(
                    "node '{}' already holds {MAX_ATTRIBUTES} attributes",
                    node.name
                )));
            }
            None => node.attributes.push((name.to_string(), value.to_string())),
        }
        Ok(())
    }

    /// Declare a chunked dataset `name` under `parent`
    ///
    /// Every element reads back as NaN until written.
    pub fn create_dataset(
        &mut self,
        parent: NodeId,
        name: &str,
        layout: DatasetLayout,
    ) -> ContainerResult<NodeId> {
        self.ensure_open()?;
        self.ensure_group(parent)?;
        check_name(name)?;
        layout.validate()?;

        if self.table.child(parent, name).is_some() {
            return Err(ContainerError::DuplicateName {
                parent: self.table.path(parent),
                name: name.to_string(),
            });
        }

        let id = self.table.push(Node {
            name: name.to_string(),
            parent: Some(parent),
            attributes: Vec::new(),
            kind: NodeKind::Dataset(DatasetInfo::new(layout)),
        });
        debug!(
            path = %self.table.path(id),
            length = layout.length,
            chunk_length = layout.chunk_length,
            "created dataset"
        );
        Ok(id)
    }

    /// Write `data` into elements `offset..offset + data.len()` of `dataset`
    ///
    /// Elements outside the range are left untouched.
    pub fn write_range(&mut self, dataset: NodeId, offset: u64, data: &[f64]) -> ContainerResult<()> {
        self.ensure_open()?;
        let layout = self.layout(dataset)?;

        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= layout.length)
            .ok_or_else(|| ContainerError::OutOfBounds {
                dataset: self.table.path(dataset),
                offset,
                end: offset.saturating_add(data.len() as u64),
                length: layout.length,
            })?;

        if data.is_empty() {
            return Ok(());
        }

        let first_chunk = offset / layout.chunk_length;
        let last_chunk = (end - 1) / layout.chunk_length;

        for chunk in first_chunk..=last_chunk {
            let chunk_start = chunk * layout.chunk_length;
            let chunk_len = layout.chunk_len(chunk);
            let lo = offset.max(chunk_start) - chunk_start;
            let hi = end.min(chunk_start + chunk_len) - chunk_start;
            let source = &data[(chunk_start + lo - offset) as usize..(chunk_start + hi - offset) as usize];

            let key = (dataset, chunk);
            let mut elements = match self.cache.take(key) {
                Some(elements) => elements,
                None if lo == 0 && hi == chunk_len => Vec::new(),
                None => self.load_chunk(dataset, chunk, &layout)?,
            };

            if elements.is_empty() {
                elements = source.to_vec();
            } else {
                elements[lo as usize..hi as usize].copy_from_slice(source);
            }
            self.cache.put(key, elements);
        }

        while self.cache.bytes > self.options.cache_bytes && self.evict_oldest()? {}

        Ok(())
    }

    /// Encode and write every cached chunk
    ///
    /// A chunk that fails to store stays cached, so a later flush retries it.
    pub fn flush(&mut self) -> ContainerResult<()> {
        self.ensure_open()?;
        while self.evict_oldest()? {}
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    /// Flush, write the index, sync and close the file
    pub fn finalize(mut self) -> ContainerResult<()> {
        self.finish().map(drop)
    }

    /// Finalize and hand back the storage
    pub fn finalize_into_inner(mut self) -> ContainerResult<S> {
        self.finish()?.ok_or(ContainerError::Finalized)
    }

    /// Whether the writer has been finalized (or failed finalizing)
    pub fn is_finalized(&self) -> bool {
        self.file.is_none()
    }

    fn finish(&mut self) -> ContainerResult<Option<S>> {
        if self.file.is_none() {
            return Ok(None);
        }

        let result = self.flush().and_then(|()| self.write_index());

        // The handle is released whether or not the index made it to disk.
        let storage = self.file.take();
        self.cache.clear();

        match &result {
            Ok(()) => info!(path = %self.path.display(), nodes = self.table.len(), "finalized container"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to finalize container"),
        }
        result.map(|()| storage)
    }

    /// Store the oldest cached chunk; `false` once the cache is empty
    fn evict_oldest(&mut self) -> ContainerResult<bool> {
        let Some(((node, chunk), elements)) = self.cache.pop_oldest() else {
            return Ok(false);
        };
        if let Err(e) = self.store_chunk(node, chunk, &elements) {
            self.cache.restore((node, chunk), elements);
            return Err(e);
        }
        Ok(true)
    }

    fn write_index(&mut self) -> ContainerResult<()> {
        let index = self.table.to_bytes()?;
        let index_offset = self.end_offset;
        let file = self.file.as_mut().ok_or(ContainerError::Finalized)?;

        file.seek(SeekFrom::Start(index_offset))?;
        file.write_all(&index)?;
        Superblock::finalized(index_offset, &index).write_to(file)?;
        file.sync()?;

        self.end_offset += index.len() as u64;
        Ok(())
    }

    fn ensure_open(&self) -> ContainerResult<()> {
        if self.file.is_none() {
            return Err(ContainerError::Finalized);
        }
        Ok(())
    }

    fn ensure_group(&self, node: NodeId) -> ContainerResult<()> {
        if self.table.get(node)?.is_group() {
            Ok(())
        } else {
            Err(ContainerError::NotAGroup(self.table.path(node)))
        }
    }

    fn layout(&self, dataset: NodeId) -> ContainerResult<DatasetLayout> {
        self.table
            .get(dataset)?
            .dataset()
            .map(|info| info.layout)
            .ok_or_else(|| ContainerError::NotADataset(self.table.path(dataset)))
    }

    fn load_chunk(
        &mut self,
        dataset: NodeId,
        chunk: u64,
        layout: &DatasetLayout,
    ) -> ContainerResult<Vec<f64>> {
        let entry = self.chunk_entry(dataset, chunk)?;
        let file = self.file.as_mut().ok_or(ContainerError::Finalized)?;
        read_chunk(file, &entry, layout, chunk)
    }

    fn chunk_entry(&self, dataset: NodeId, chunk: u64) -> ContainerResult<ChunkEntry> {
        self.table
            .get(dataset)?
            .dataset()
            .and_then(|info| info.chunks.get(chunk as usize).copied())
            .ok_or_else(|| ContainerError::NotADataset(self.table.path(dataset)))
    }

    fn store_chunk(&mut self, dataset: NodeId, chunk: u64, elements: &[f64]) -> ContainerResult<()> {
        let layout = self.layout(dataset)?;
        let stored = encode_chunk(elements, &layout.pipeline)?;
        let stored_size = u32::try_from(stored.len()).map_err(|_| {
            ContainerError::InvalidLayout(format!("encoded chunk of {} bytes", stored.len()))
        })?;

        let previous = self.chunk_entry(dataset, chunk)?;
        let in_place = previous.is_stored() && stored_size <= previous.stored_size;
        let offset = if in_place { previous.offset } else { self.end_offset };

        let file = self.file.as_mut().ok_or(ContainerError::Finalized)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&stored)?;
        if !in_place {
            self.end_offset += stored.len() as u64;
        }

        let entry = ChunkEntry {
            offset,
            stored_size,
            checksum: checksum(&stored),
        };
        if let NodeKind::Dataset(info) = &mut self.table.get_mut(dataset)?.kind
            && let Some(slot) = info.chunks.get_mut(chunk as usize)
        {
            *slot = entry;
        }

        debug!(dataset = dataset.0, chunk, offset, stored_size, in_place, "stored chunk");
        Ok(())
    }
}

impl<S: Storage> Drop for ContainerWriter<S> {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(e) = self.finish() {
                warn!(path = %self.path.display(), error = %e, "container dropped without a clean finalize");
            }
        }
    }
}
