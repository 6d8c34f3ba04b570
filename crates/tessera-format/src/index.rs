//! Node index: the group/attribute/dataset tree stored at the end of a file

use binrw::io::{Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite};

use crate::codec::FilterPipeline;
use crate::error::{ContainerError, ContainerResult};

/// Index magic bytes
pub const INDEX_MAGIC: [u8; 4] = *b"TIDX";

/// Parent id of the root node on disk
const NO_PARENT: u32 = u32::MAX;

/// Element type tag for `f64`
const ELEMENT_TYPE_F64: u8 = 1;

const KIND_GROUP: u8 = 0;
const KIND_DATASET: u8 = 1;

/// Handle to a node inside one container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// The root group
    pub const ROOT: Self = Self(0);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Location of one stored chunk payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct ChunkEntry {
    /// Absolute file offset; 0 means the chunk was never written
    pub offset: u64,
    /// Stored (encoded) size in bytes
    pub stored_size: u32,
    /// MD5 of the stored bytes
    pub checksum: [u8; 16],
}

impl ChunkEntry {
    /// Whether a payload exists for this chunk
    pub fn is_stored(&self) -> bool {
        self.offset != 0
    }
}

/// Geometry and filters requested when declaring a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetLayout {
    /// Total element count
    pub length: u64,
    /// Elements per chunk
    pub chunk_length: u64,
    /// Filters applied to each chunk
    pub pipeline: FilterPipeline,
}

impl DatasetLayout {
    /// Number of chunks covering `length` (last chunk may be partial)
    pub fn chunk_count(&self) -> u64 {
        if self.chunk_length == 0 {
            0
        } else {
            self.length.div_ceil(self.chunk_length)
        }
    }

    /// Element count of chunk `chunk`, accounting for a partial tail
    pub fn chunk_len(&self, chunk: u64) -> u64 {
        let start = chunk * self.chunk_length;
        self.chunk_length.min(self.length.saturating_sub(start))
    }

    pub(crate) fn validate(&self) -> ContainerResult<()> {
        if self.length > 0 && self.chunk_length == 0 {
            return Err(ContainerError::InvalidLayout(format!(
                "chunk length must be positive for a dataset of {} elements",
                self.length
            )));
        }
        if self.chunk_length > u64::from(u32::MAX) / crate::codec::ELEMENT_SIZE as u64 {
            return Err(ContainerError::InvalidLayout(format!(
                "chunk length {} exceeds the stored chunk size limit",
                self.chunk_length
            )));
        }
        if let Some(level) = self.pipeline.deflate_level
            && level > 9
        {
            return Err(ContainerError::InvalidLayout(format!(
                "deflate level {level} outside 0-9"
            )));
        }
        Ok(())
    }
}

/// Dataset state: its layout plus where each chunk lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    /// Declared geometry and filters
    pub layout: DatasetLayout,
    /// One entry per chunk
    pub chunks: Vec<ChunkEntry>,
}

impl DatasetInfo {
    pub(crate) fn new(layout: DatasetLayout) -> Self {
        Self {
            layout,
            chunks: vec![ChunkEntry::default(); layout.chunk_count() as usize],
        }
    }
}

/// What a node is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Container of other nodes
    Group,
    /// Chunked array of `f64`
    Dataset(DatasetInfo),
}

/// One entry of the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Name within the parent
    pub name: String,
    /// Parent node; `None` only for the root
    pub parent: Option<NodeId>,
    /// String attributes in insertion order
    pub attributes: Vec<(String, String)>,
    /// Group or dataset
    pub kind: NodeKind,
}

impl Node {
    /// Value of attribute `name`
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Dataset details, if this node is a dataset
    pub fn dataset(&self) -> Option<&DatasetInfo> {
        match &self.kind {
            NodeKind::Dataset(info) => Some(info),
            NodeKind::Group => None,
        }
    }

    /// Whether this node is a group
    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group)
    }
}

/// Every node of a container, root first, in creation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTable {
    nodes: Vec<Node>,
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTable {
    /// Table holding only the root group
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: String::new(),
                parent: None,
                attributes: Vec::new(),
                kind: NodeKind::Group,
            }],
        }
    }

    /// Number of nodes including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root is always present
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node for `id`
    pub fn get(&self, id: NodeId) -> ContainerResult<&Node> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| ContainerError::UnknownNode(format!("#{}", id.0)))
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> ContainerResult<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .ok_or_else(|| ContainerError::UnknownNode(format!("#{}", id.0)))
    }

    /// Child of `parent` named `name`
    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.parent == Some(parent) && node.name == name)
            .map(|index| NodeId(index as u32))
    }

    /// Children of `parent` in creation order
    pub fn children(&self, parent: NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent == Some(parent))
            .map(|(index, _)| NodeId(index as u32))
            .collect()
    }

    /// Slash-separated path of `id` ("/" for the root)
    pub fn path(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            match self.nodes.get(node_id.index()) {
                Some(node) if node.parent.is_some() => {
                    parts.push(node.name.as_str());
                    current = node.parent;
                }
                _ => break,
            }
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }

    /// Resolve a slash-separated path from the root
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(NodeId::ROOT, |parent, segment| self.child(parent, segment))
    }

    pub(crate) fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId((self.nodes.len() - 1) as u32)
    }

    /// Serialize the table
    pub fn to_bytes(&self) -> ContainerResult<Vec<u8>> {
        let mut cursor = binrw::io::Cursor::new(Vec::new());
        self.write_options(&mut cursor, binrw::Endian::Little, ())?;
        Ok(cursor.into_inner())
    }

    /// Parse a table produced by [`NodeTable::to_bytes`]
    pub fn from_bytes(data: &[u8]) -> ContainerResult<Self> {
        let mut cursor = binrw::io::Cursor::new(data);
        Ok(Self::read_options(&mut cursor, binrw::Endian::Little, ())?)
    }
}

/// Longest node or attribute name in bytes (u16 length prefix)
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Longest attribute value in bytes (u32 length prefix)
pub const MAX_VALUE_LEN: usize = u32::MAX as usize;

/// Most attributes one node can carry
pub const MAX_ATTRIBUTES: usize = u16::MAX as usize;

fn read_string<R: Read + Seek>(reader: &mut R, len: u64) -> BinResult<String> {
    // Grow with the data instead of trusting the prefix for the allocation
    let mut bytes = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut bytes)?;
    let pos = reader.stream_position()?;
    if bytes.len() as u64 != len {
        return Err(binrw::Error::AssertFail {
            pos,
            message: format!("string of {len} bytes truncated to {}", bytes.len()),
        });
    }
    String::from_utf8(bytes).map_err(|e| binrw::Error::Custom {
        pos,
        err: Box::new(e),
    })
}

fn read_name<R: Read + Seek>(reader: &mut R, endian: binrw::Endian) -> BinResult<String> {
    let len = u16::read_options(reader, endian, ())?;
    read_string(reader, u64::from(len))
}

fn read_value<R: Read + Seek>(reader: &mut R, endian: binrw::Endian) -> BinResult<String> {
    let len = u32::read_options(reader, endian, ())?;
    read_string(reader, u64::from(len))
}

fn write_name<W: Write + Seek>(
    writer: &mut W,
    endian: binrw::Endian,
    value: &str,
) -> BinResult<()> {
    let len = u16::try_from(value.len()).map_err(|_| binrw::Error::AssertFail {
        pos: writer.stream_position().unwrap_or_default(),
        message: format!("name of {} bytes exceeds {MAX_NAME_LEN}", value.len()),
    })?;
    len.write_options(writer, endian, ())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn write_value<W: Write + Seek>(
    writer: &mut W,
    endian: binrw::Endian,
    value: &str,
) -> BinResult<()> {
    let len = u32::try_from(value.len()).map_err(|_| binrw::Error::AssertFail {
        pos: writer.stream_position().unwrap_or_default(),
        message: format!("value of {} bytes exceeds {MAX_VALUE_LEN}", value.len()),
    })?;
    len.write_options(writer, endian, ())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

/// Reject names the index cannot store
pub(crate) fn check_name(name: &str) -> ContainerResult<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(ContainerError::InvalidName(format!(
            "name of {} bytes exceeds {MAX_NAME_LEN}",
            name.len()
        )));
    }
    Ok(())
}

/// Reject attribute values the index cannot store
pub(crate) fn check_value(value: &str) -> ContainerResult<()> {
    if value.len() > MAX_VALUE_LEN {
        return Err(ContainerError::InvalidAttribute(format!(
            "attribute value of {} bytes exceeds {MAX_VALUE_LEN}",
            value.len()
        )));
    }
    Ok(())
}

fn custom_error<R: Seek>(reader: &mut R, err: ContainerError) -> binrw::Error {
    binrw::Error::Custom {
        pos: reader.stream_position().unwrap_or_default(),
        err: Box::new(err),
    }
}

impl BinRead for NodeTable {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != INDEX_MAGIC {
            return Err(custom_error(
                reader,
                ContainerError::InvalidMagic {
                    expected: INDEX_MAGIC,
                    actual: magic,
                },
            ));
        }

        let node_count = u32::read_options(reader, endian, ())?;
        let mut nodes = Vec::with_capacity(node_count.min(1 << 16) as usize);

        for index in 0..node_count {
            let kind = u8::read_options(reader, endian, ())?;
            let parent = u32::read_options(reader, endian, ())?;
            let parent = match parent {
                NO_PARENT => None,
                id if id < index => Some(NodeId(id)),
                id => {
                    return Err(custom_error(
                        reader,
                        ContainerError::UnknownNode(format!("parent #{id} of node #{index}")),
                    ));
                }
            };
            let name = read_name(reader, endian)?;

            let attribute_count = u16::read_options(reader, endian, ())?;
            let mut attributes = Vec::with_capacity(usize::from(attribute_count));
            for _ in 0..attribute_count {
                let key = read_name(reader, endian)?;
                let value = read_value(reader, endian)?;
                attributes.push((key, value));
            }

            let kind = match kind {
                KIND_GROUP => NodeKind::Group,
                KIND_DATASET => NodeKind::Dataset(read_dataset(reader, endian)?),
                other => {
                    return Err(custom_error(
                        reader,
                        ContainerError::InvalidLayout(format!("unknown node kind {other}")),
                    ));
                }
            };

            nodes.push(Node {
                name,
                parent,
                attributes,
                kind,
            });
        }

        if nodes.first().is_none_or(|root| root.parent.is_some()) {
            return Err(custom_error(
                reader,
                ContainerError::UnknownNode("root group missing".to_string()),
            ));
        }

        Ok(Self { nodes })
    }
}

fn read_dataset<R: Read + Seek>(reader: &mut R, endian: binrw::Endian) -> BinResult<DatasetInfo> {
    let element_type = u8::read_options(reader, endian, ())?;
    if element_type != ELEMENT_TYPE_F64 {
        return Err(custom_error(
            reader,
            ContainerError::InvalidLayout(format!("unknown element type {element_type}")),
        ));
    }

    let length = u64::read_options(reader, endian, ())?;
    let chunk_length = u64::read_options(reader, endian, ())?;
    let filters = u8::read_options(reader, endian, ())?;
    let deflate_level = u8::read_options(reader, endian, ())?;
    let pipeline =
        FilterPipeline::from_mask(filters, deflate_level).map_err(|e| custom_error(reader, e))?;

    let layout = DatasetLayout {
        length,
        chunk_length,
        pipeline,
    };

    let chunk_count = u64::read_options(reader, endian, ())?;
    if chunk_count != layout.chunk_count() {
        return Err(custom_error(
            reader,
            ContainerError::InvalidLayout(format!(
                "chunk table holds {chunk_count} entries, layout needs {}",
                layout.chunk_count()
            )),
        ));
    }

    let mut chunks = Vec::with_capacity(chunk_count.min(1 << 20) as usize);
    for _ in 0..chunk_count {
        chunks.push(ChunkEntry::read_options(reader, endian, ())?);
    }

    Ok(DatasetInfo { layout, chunks })
}

impl BinWrite for NodeTable {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        writer.write_all(&INDEX_MAGIC)?;
        (self.nodes.len() as u32).write_options(writer, endian, ())?;

        for node in &self.nodes {
            let kind = match node.kind {
                NodeKind::Group => KIND_GROUP,
                NodeKind::Dataset(_) => KIND_DATASET,
            };
            kind.write_options(writer, endian, ())?;
            node.parent
                .map_or(NO_PARENT, |parent| parent.0)
                .write_options(writer, endian, ())?;
            write_name(writer, endian, &node.name)?;

            let attribute_count =
                u16::try_from(node.attributes.len()).map_err(|_| binrw::Error::AssertFail {
                    pos: writer.stream_position().unwrap_or_default(),
                    message: format!("{} attributes exceed {MAX_ATTRIBUTES}", node.attributes.len()),
                })?;
            attribute_count.write_options(writer, endian, ())?;
            for (key, value) in &node.attributes {
                write_name(writer, endian, key)?;
                write_value(writer, endian, value)?;
            }

            if let NodeKind::Dataset(info) = &node.kind {
                ELEMENT_TYPE_F64.write_options(writer, endian, ())?;
                info.layout.length.write_options(writer, endian, ())?;
                info.layout.chunk_length.write_options(writer, endian, ())?;
                info.layout.pipeline.mask().write_options(writer, endian, ())?;
                info.layout
                    .pipeline
                    .deflate_level
                    .unwrap_or(0)
                    .write_options(writer, endian, ())?;
                (info.chunks.len() as u64).write_options(writer, endian, ())?;
                for chunk in &info.chunks {
                    chunk.write_options(writer, endian, ())?;
                }
            }
        }

        Ok(())
    }
}
