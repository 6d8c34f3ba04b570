//! Writer error types

use std::path::PathBuf;
use std::time::Duration;

use tessera_format::ContainerError;
use thiserror::Error;

/// Result type for writer operations
pub type Result<T> = std::result::Result<T, WriterError>;

/// Errors raised while opening, writing or closing a period file
#[derive(Debug, Error)]
pub enum WriterError {
    /// Target file exists; files are never appended to
    #[error("file already exists: {0}")]
    FileExists(PathBuf),

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No positive chunk length fits the period at this sample period
    #[error(
        "sample rate too low: sample period {sample_period:?} yields {total_length} samples per file period {file_period:?}"
    )]
    SampleRateTooLow {
        /// Period covered by the file
        file_period: Duration,
        /// Period between samples
        sample_period: Duration,
        /// Resulting element count
        total_length: u64,
    },

    /// Period or sample period that cannot describe a file
    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    /// Write offset is not a whole number of sample periods
    #[error("offset {offset:?} is not a multiple of the sample period {sample_period:?}")]
    InvalidOffset {
        /// Offset within the file period
        offset: Duration,
        /// Sample period of the session
        sample_period: Duration,
    },

    /// Write would land outside the dataset
    #[error("write to {dataset} at {offset}..{end} exceeds dataset length {length}")]
    OutOfBounds {
        /// Dataset path
        dataset: String,
        /// First element written
        offset: u64,
        /// One past the last element written
        end: u64,
        /// Dataset length
        length: u64,
    },

    /// Request targets a dataset not declared at open
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    /// Request or catalog item inconsistent with the session
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Two entities map to the same group or dataset name
    #[error("duplicate name '{name}' in {scope}")]
    DuplicateName {
        /// Where the collision happened
        scope: String,
        /// Colliding name
        name: String,
    },

    /// Write or close on a session that is not open
    #[error("file session is not open")]
    NotOpen,

    /// Open called on a session that was already used
    #[error("file session was already opened")]
    AlreadyOpened,

    /// Operation observed cancellation
    #[error("operation canceled")]
    Canceled,

    /// Property bag could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage backend failure
    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    /// HDF5 library failure
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking task panicked or was aborted
    #[error("background task failed: {0}")]
    TaskFailed(String),
}

impl WriterError {
    /// Whether the error is a cancellation rather than a failure
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl From<tokio::task::JoinError> for WriterError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed(err.to_string())
    }
}
