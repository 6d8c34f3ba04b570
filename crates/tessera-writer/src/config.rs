//! Configuration for the period writer

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tessera_format::{ContainerOptions, DEFAULT_CACHE_BYTES, FilterPipeline};

use crate::error::{Result, WriterError};
use crate::planner::{ChunkPlanner, DEFAULT_TARGET_CHUNK_BYTES};

/// Configuration for the period writer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Directory receiving the period files (created on open)
    pub output_dir: PathBuf,

    /// File extension, without the dot
    pub file_extension: String,

    /// Upper bound for one chunk (in bytes)
    pub target_chunk_bytes: usize,

    /// Deflate level, 0-9
    pub compression_level: u8,

    /// Byte-shuffle chunks before compressing them
    pub shuffle: bool,

    /// Decoded chunk data kept in memory per file (in bytes)
    pub cache_bytes: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./data"),
            file_extension: "tsra".to_string(),
            target_chunk_bytes: DEFAULT_TARGET_CHUNK_BYTES, // 64 KiB
            compression_level: 6,
            shuffle: true,
            cache_bytes: DEFAULT_CACHE_BYTES, // 16 MiB
        }
    }
}

impl WriterConfig {
    /// Create a new configuration writing into `output_dir`
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Set the output directory
    #[must_use]
    pub fn with_output_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output_dir = path.as_ref().to_path_buf();
        self
    }

    /// Set the file extension
    #[must_use]
    pub fn with_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    /// Set the chunk size bound
    #[must_use]
    pub const fn with_target_chunk_bytes(mut self, bytes: usize) -> Self {
        self.target_chunk_bytes = bytes;
        self
    }

    /// Set the deflate level
    #[must_use]
    pub const fn with_compression_level(mut self, level: u8) -> Self {
        self.compression_level = level;
        self
    }

    /// Enable or disable the byte shuffle
    #[must_use]
    pub const fn with_shuffle(mut self, enable: bool) -> Self {
        self.shuffle = enable;
        self
    }

    /// Set the in-memory chunk budget
    #[must_use]
    pub const fn with_cache_bytes(mut self, bytes: usize) -> Self {
        self.cache_bytes = bytes;
        self
    }

    /// Check the values before any file is touched
    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(WriterError::InvalidConfig(format!(
                "compression level {} outside 0-9",
                self.compression_level
            )));
        }
        if self.target_chunk_bytes == 0 {
            return Err(WriterError::InvalidConfig(
                "target chunk size must be positive".to_string(),
            ));
        }
        if self.file_extension.is_empty() {
            return Err(WriterError::InvalidConfig(
                "file extension must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Planner using the configured chunk bound
    pub fn planner(&self) -> ChunkPlanner {
        ChunkPlanner::new(self.target_chunk_bytes)
    }

    /// Filters applied to every dataset
    pub fn pipeline(&self) -> FilterPipeline {
        FilterPipeline {
            shuffle: self.shuffle,
            deflate_level: Some(self.compression_level),
        }
    }

    /// Container options derived from this configuration
    pub fn container_options(&self) -> ContainerOptions {
        ContainerOptions {
            cache_bytes: self.cache_bytes,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WriterConfig::default();
        assert_eq!(config.output_dir, PathBuf::from("./data"));
        assert_eq!(config.file_extension, "tsra");
        assert_eq!(config.planner().max_chunk_length(), 8_192);
        assert_eq!(config.pipeline(), FilterPipeline::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = WriterConfig::default().with_compression_level(10);
        assert!(matches!(config.validate(), Err(WriterError::InvalidConfig(_))));

        let config = WriterConfig::default().with_target_chunk_bytes(0);
        assert!(matches!(config.validate(), Err(WriterError::InvalidConfig(_))));

        let config = WriterConfig::default().with_file_extension("");
        assert!(matches!(config.validate(), Err(WriterError::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: WriterConfig =
            serde_json::from_str(r#"{"output_dir": "/tmp/out", "shuffle": false}"#)
                .expect("Test operation should succeed");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert!(!config.shuffle);
        assert_eq!(config.compression_level, 6);
        assert_eq!(config.cache_bytes, DEFAULT_CACHE_BYTES);
    }
}
