//! Chunk encoding: byte shuffle followed by deflate
//!
//! A chunk is a run of `f64` elements. On disk it is stored as the
//! little-endian element bytes, optionally transposed by the shuffle
//! filter (all first bytes, then all second bytes, ...) and then
//! optionally zlib-deflated.

use flate2::Compression;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use md5::{Digest, Md5};
use std::io::Read;

use crate::error::{ContainerError, ContainerResult};

/// Size of one stored element in bytes
pub const ELEMENT_SIZE: usize = std::mem::size_of::<f64>();

/// Filter bit: byte shuffle
pub const FILTER_SHUFFLE: u8 = 0x01;

/// Filter bit: deflate
pub const FILTER_DEFLATE: u8 = 0x02;

/// Default deflate level
pub const DEFAULT_DEFLATE_LEVEL: u8 = 6;

/// Filters applied to every chunk of a dataset, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterPipeline {
    /// Apply the byte shuffle before compression
    pub shuffle: bool,
    /// Deflate level (0-9); `None` stores chunks uncompressed
    pub deflate_level: Option<u8>,
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self {
            shuffle: true,
            deflate_level: Some(DEFAULT_DEFLATE_LEVEL),
        }
    }
}

impl FilterPipeline {
    /// Pipeline that stores raw element bytes
    pub const fn none() -> Self {
        Self {
            shuffle: false,
            deflate_level: None,
        }
    }

    /// Filter bitmask as stored in the index
    pub fn mask(&self) -> u8 {
        let mut mask = 0;
        if self.shuffle {
            mask |= FILTER_SHUFFLE;
        }
        if self.deflate_level.is_some() {
            mask |= FILTER_DEFLATE;
        }
        mask
    }

    /// Rebuild a pipeline from the index representation
    pub fn from_mask(mask: u8, deflate_level: u8) -> ContainerResult<Self> {
        if mask & !(FILTER_SHUFFLE | FILTER_DEFLATE) != 0 {
            return Err(ContainerError::InvalidLayout(format!(
                "unknown filter mask 0x{mask:02X}"
            )));
        }
        Ok(Self {
            shuffle: mask & FILTER_SHUFFLE != 0,
            deflate_level: (mask & FILTER_DEFLATE != 0).then_some(deflate_level),
        })
    }
}

/// MD5 of `data`
pub fn checksum(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&result);
    bytes
}

/// Transpose element bytes so that byte `b` of every element is contiguous
pub fn shuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() % element_size != 0 {
        return data.to_vec();
    }

    let count = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for (i, element) in data.chunks_exact(element_size).enumerate() {
        for (b, byte) in element.iter().enumerate() {
            out[b * count + i] = *byte;
        }
    }
    out
}

/// Inverse of [`shuffle`]
pub fn unshuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() % element_size != 0 {
        return data.to_vec();
    }

    let count = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for (i, element) in out.chunks_exact_mut(element_size).enumerate() {
        for (b, byte) in element.iter_mut().enumerate() {
            *byte = data[b * count + i];
        }
    }
    out
}

/// Encode chunk elements through `pipeline`
pub fn encode_chunk(elements: &[f64], pipeline: &FilterPipeline) -> ContainerResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(elements.len() * ELEMENT_SIZE);
    for value in elements {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    if pipeline.shuffle {
        bytes = shuffle(&bytes, ELEMENT_SIZE);
    }

    match pipeline.deflate_level {
        Some(level) => {
            let mut encoder = ZlibEncoder::new(bytes.as_slice(), Compression::new(u32::from(level)));
            let mut compressed = Vec::new();
            encoder
                .read_to_end(&mut compressed)
                .map_err(|e| ContainerError::Compression(format!("deflate failed: {e}")))?;
            Ok(compressed)
        }
        None => Ok(bytes),
    }
}

/// Decode a stored chunk back into exactly `element_count` elements
pub fn decode_chunk(
    stored: &[u8],
    pipeline: &FilterPipeline,
    element_count: usize,
) -> ContainerResult<Vec<f64>> {
    let expected_bytes = element_count * ELEMENT_SIZE;

    let mut bytes = if pipeline.deflate_level.is_some() {
        let mut decoder = ZlibDecoder::new(stored).take(expected_bytes as u64 + 1);
        let mut decompressed = Vec::with_capacity(expected_bytes);
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| ContainerError::Compression(format!("inflate failed: {e}")))?;
        decompressed
    } else {
        stored.to_vec()
    };

    if bytes.len() != expected_bytes {
        return Err(ContainerError::Compression(format!(
            "chunk size mismatch: expected {expected_bytes} bytes, got {}",
            bytes.len()
        )));
    }

    if pipeline.shuffle {
        bytes = unshuffle(&bytes, ELEMENT_SIZE);
    }

    Ok(bytes
        .chunks_exact(ELEMENT_SIZE)
        .map(|raw| {
            let mut le = [0u8; ELEMENT_SIZE];
            le.copy_from_slice(raw);
            f64::from_le_bytes(le)
        })
        .collect())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shuffle_layout() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(shuffle(&data, 2), vec![1, 3, 5, 7, 2, 4, 6, 8]);
        assert_eq!(unshuffle(&shuffle(&data, 2), 2), data.to_vec());
    }

    #[test]
    fn test_shuffle_ignores_ragged_input() {
        let data = [1u8, 2, 3];
        assert_eq!(shuffle(&data, 2), data.to_vec());
    }

    #[test]
    fn test_filter_mask() {
        assert_eq!(FilterPipeline::default().mask(), FILTER_SHUFFLE | FILTER_DEFLATE);
        assert_eq!(FilterPipeline::none().mask(), 0);

        let pipeline = FilterPipeline::from_mask(FILTER_DEFLATE, 9).expect("valid mask");
        assert!(!pipeline.shuffle);
        assert_eq!(pipeline.deflate_level, Some(9));

        assert!(FilterPipeline::from_mask(0x80, 0).is_err());
    }

    #[test]
    fn test_deflate_shrinks_smooth_signal() {
        let elements: Vec<f64> = (0..4096).map(|i| f64::from(i).sin()).collect();
        let encoded = encode_chunk(&elements, &FilterPipeline::default()).expect("encode");
        assert!(encoded.len() < elements.len() * ELEMENT_SIZE);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let encoded = encode_chunk(&[1.0, 2.0], &FilterPipeline::default()).expect("encode");
        assert!(decode_chunk(&encoded, &FilterPipeline::default(), 3).is_err());
    }

    #[test]
    fn test_nan_survives_pipeline() {
        let elements = [f64::NAN, 1.5, f64::NAN];
        let encoded = encode_chunk(&elements, &FilterPipeline::default()).expect("encode");
        let decoded = decode_chunk(&encoded, &FilterPipeline::default(), 3).expect("decode");
        assert!(decoded[0].is_nan());
        assert_eq!(decoded[1], 1.5);
        assert!(decoded[2].is_nan());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn pipeline() -> impl Strategy<Value = FilterPipeline> {
            (any::<bool>(), prop::option::of(0u8..=9)).prop_map(|(shuffle, deflate_level)| {
                FilterPipeline {
                    shuffle,
                    deflate_level,
                }
            })
        }

        proptest! {
            /// Every pipeline is lossless, bit for bit
            #[test]
            fn chunk_codec_is_lossless(
                elements in prop::collection::vec(any::<f64>(), 0..2048),
                pipeline in pipeline()
            ) {
                let encoded = encode_chunk(&elements, &pipeline).expect("encode");
                let decoded = decode_chunk(&encoded, &pipeline, elements.len()).expect("decode");

                let original: Vec<u64> = elements.iter().map(|v| v.to_bits()).collect();
                let restored: Vec<u64> = decoded.iter().map(|v| v.to_bits()).collect();
                prop_assert_eq!(original, restored);
            }
        }
    }
}
