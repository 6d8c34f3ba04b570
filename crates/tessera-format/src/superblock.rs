//! Superblock at the start of every container file

use binrw::io::{Read, Seek, SeekFrom, Write};
use binrw::{BinRead, BinWrite};

use crate::codec::checksum;
use crate::error::{ContainerError, ContainerResult};

/// Container magic bytes
pub const CONTAINER_MAGIC: [u8; 4] = *b"TSRA";

/// Current container format version
pub const CONTAINER_VERSION: u16 = 1;

/// Superblock size on disk; chunk payloads start right after it
pub const SUPERBLOCK_SIZE: u64 = 40;

/// Superblock flag: index has been written and the file is complete
pub const FLAG_FINALIZED: u16 = 0x0001;

/// Fixed-size file header locating the index
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct Superblock {
    /// Magic bytes (always "TSRA")
    pub magic: [u8; 4],
    /// Format version
    pub version: u16,
    /// Flags (`FLAG_FINALIZED`)
    pub flags: u16,
    /// Absolute offset of the index
    pub index_offset: u64,
    /// Index length in bytes
    pub index_length: u64,
    /// MD5 of the index bytes
    pub index_checksum: [u8; 16],
}

impl Superblock {
    /// Superblock of a file that is still being written
    pub fn unfinalized() -> Self {
        Self {
            magic: CONTAINER_MAGIC,
            version: CONTAINER_VERSION,
            flags: 0,
            index_offset: 0,
            index_length: 0,
            index_checksum: [0u8; 16],
        }
    }

    /// Superblock pointing at a complete index
    pub fn finalized(index_offset: u64, index: &[u8]) -> Self {
        Self {
            magic: CONTAINER_MAGIC,
            version: CONTAINER_VERSION,
            flags: FLAG_FINALIZED,
            index_offset,
            index_length: index.len() as u64,
            index_checksum: checksum(index),
        }
    }

    /// Whether the index has been written
    pub fn is_finalized(&self) -> bool {
        self.flags & FLAG_FINALIZED != 0
    }

    /// Read and validate the superblock at the start of `reader`
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> ContainerResult<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let superblock = Self::read(reader)?;

        if superblock.magic != CONTAINER_MAGIC {
            return Err(ContainerError::InvalidMagic {
                expected: CONTAINER_MAGIC,
                actual: superblock.magic,
            });
        }
        if superblock.version != CONTAINER_VERSION {
            return Err(ContainerError::UnsupportedVersion(superblock.version));
        }

        Ok(superblock)
    }

    /// Overwrite the superblock at the start of `writer`
    pub fn write_to<W: Write + Seek>(&self, writer: &mut W) -> ContainerResult<()> {
        writer.seek(SeekFrom::Start(0))?;
        self.write(writer)?;
        Ok(())
    }

    /// Check `index` against the stored length and checksum
    pub fn verify_index(&self, index: &[u8]) -> ContainerResult<()> {
        let actual = checksum(index);
        if index.len() as u64 != self.index_length || actual != self.index_checksum {
            return Err(ContainerError::ChecksumMismatch {
                context: "index".to_string(),
                expected: hex::encode(self.index_checksum),
                actual: hex::encode(actual),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use binrw::io::Cursor;

    #[test]
    fn test_superblock_size() {
        let mut buffer = Cursor::new(Vec::new());
        Superblock::unfinalized()
            .write_to(&mut buffer)
            .expect("Test operation should succeed");
        assert_eq!(buffer.into_inner().len() as u64, SUPERBLOCK_SIZE);
    }

    #[test]
    fn test_finalized_round_trip() {
        let index = b"index bytes";
        let superblock = Superblock::finalized(4096, index);

        let mut buffer = Cursor::new(Vec::new());
        superblock
            .write_to(&mut buffer)
            .expect("Test operation should succeed");
        let parsed = Superblock::read_from(&mut buffer).expect("Test operation should succeed");

        assert_eq!(parsed, superblock);
        assert!(parsed.is_finalized());
        assert!(parsed.verify_index(index).is_ok());
        assert!(parsed.verify_index(b"other bytes").is_err());
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let mut superblock = Superblock::unfinalized();
        superblock.magic = *b"HDF\x89";

        let mut buffer = Cursor::new(Vec::new());
        superblock
            .write_to(&mut buffer)
            .expect("Test operation should succeed");

        let result = Superblock::read_from(&mut buffer);
        assert!(matches!(result, Err(ContainerError::InvalidMagic { .. })));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut superblock = Superblock::unfinalized();
        superblock.version = 7;

        let mut buffer = Cursor::new(Vec::new());
        superblock
            .write_to(&mut buffer)
            .expect("Test operation should succeed");

        let result = Superblock::read_from(&mut buffer);
        assert!(matches!(result, Err(ContainerError::UnsupportedVersion(7))));
    }
}
