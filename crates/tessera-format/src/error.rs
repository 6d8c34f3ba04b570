//! Container error types

use thiserror::Error;

/// Container-specific error type
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Invalid superblock or index magic bytes
    #[error("invalid magic: expected {expected:02X?}, got {actual:02X?}")]
    InvalidMagic {
        /// Magic bytes the format requires
        expected: [u8; 4],
        /// Magic bytes found in the file
        actual: [u8; 4],
    },

    /// Format version this build cannot read
    #[error("unsupported container version: {0}")]
    UnsupportedVersion(u16),

    /// File was never finalized, so it carries no index
    #[error("container is not finalized")]
    NotFinalized,

    /// Stored checksum does not match the bytes read
    #[error("checksum mismatch in {context}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// What was being verified
        context: String,
        /// Expected checksum (hex)
        expected: String,
        /// Actual checksum (hex)
        actual: String,
    },

    /// Compression or decompression failure
    #[error("compression error: {0}")]
    Compression(String),

    /// A child with this name already exists under the parent
    #[error("duplicate node name '{name}' under '{parent}'")]
    DuplicateName {
        /// Parent node name
        parent: String,
        /// Conflicting child name
        name: String,
    },

    /// Node exists but is not a group
    #[error("node '{0}' is not a group")]
    NotAGroup(String),

    /// Node exists but is not a dataset
    #[error("node '{0}' is not a dataset")]
    NotADataset(String),

    /// Node id or path does not resolve
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// Element range outside the dataset
    #[error("range {offset}..{end} out of bounds for dataset '{dataset}' of length {length}")]
    OutOfBounds {
        /// Dataset name
        dataset: String,
        /// First element of the range
        offset: u64,
        /// One past the last element of the range
        end: u64,
        /// Dataset length in elements
        length: u64,
    },

    /// Dataset geometry that cannot be stored
    #[error("invalid dataset layout: {0}")]
    InvalidLayout(String),

    /// Node or attribute name the index cannot store
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Attribute the index cannot store
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// Operation on a container that has already been finalized
    #[error("container already finalized")]
    Finalized,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

/// Result type for container operations
pub type ContainerResult<T> = Result<T, ContainerError>;
