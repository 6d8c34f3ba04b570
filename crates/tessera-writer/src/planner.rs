//! Chunk geometry for period datasets
//!
//! Every dataset of a file holds `total_length` samples. The planner splits
//! that length into equal chunks so that `chunk_length * chunk_count ==
//! total_length` holds exactly, with no partial tail chunk.

use std::time::Duration;

use tessera_format::codec::ELEMENT_SIZE;

use crate::error::{Result, WriterError};

/// Default upper bound for one chunk (64 KiB, 8192 samples)
pub const DEFAULT_TARGET_CHUNK_BYTES: usize = 64 * 1024;

/// Chunk geometry of one dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    /// Elements per chunk; 0 only for an empty dataset
    pub chunk_length: u64,
    /// Number of chunks
    pub chunk_count: u64,
}

impl ChunkLayout {
    /// Element count covered by the layout
    pub fn total_length(&self) -> u64 {
        self.chunk_length * self.chunk_count
    }
}

/// Picks chunk lengths bounded by a target chunk size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanner {
    max_chunk_length: u64,
}

impl Default for ChunkPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_CHUNK_BYTES)
    }
}

impl ChunkPlanner {
    /// Planner whose chunks never exceed `target_chunk_bytes` (at least one element)
    pub fn new(target_chunk_bytes: usize) -> Self {
        Self {
            max_chunk_length: ((target_chunk_bytes / ELEMENT_SIZE) as u64).max(1),
        }
    }

    /// Largest chunk length this planner will return
    pub fn max_chunk_length(&self) -> u64 {
        self.max_chunk_length
    }

    /// Split `total_length` into equal chunks
    ///
    /// Picks the largest divisor of `total_length` that fits the target, so
    /// common period lengths (86 400 s at 1 Hz) tile into few chunks.
    pub fn plan(&self, total_length: u64) -> ChunkLayout {
        if total_length == 0 {
            return ChunkLayout {
                chunk_length: 0,
                chunk_count: 0,
            };
        }
        if total_length <= self.max_chunk_length {
            return ChunkLayout {
                chunk_length: total_length,
                chunk_count: 1,
            };
        }

        // Smallest chunk count whose chunk length fits, walking up to the
        // first count that divides evenly.
        let mut chunk_count = total_length.div_ceil(self.max_chunk_length);
        while total_length % chunk_count != 0 {
            chunk_count += 1;
        }
        ChunkLayout {
            chunk_length: total_length / chunk_count,
            chunk_count,
        }
    }
}

/// Number of samples of `sample_period` fitting in `file_period`
///
/// # Errors
///
/// `InvalidPeriod` for a zero sample period.
pub fn total_length(file_period: Duration, sample_period: Duration) -> Result<u64> {
    if sample_period.is_zero() {
        return Err(WriterError::InvalidPeriod(
            "sample period must be positive".to_string(),
        ));
    }
    let samples = file_period.as_nanos() / sample_period.as_nanos();
    u64::try_from(samples).map_err(|_| {
        WriterError::InvalidPeriod(format!(
            "{file_period:?} holds too many samples of {sample_period:?}"
        ))
    })
}
