//! Payload compression codecs
//!
//! Every array payload in an episode container is passed through a
//! [`Codec`]. The codec used for each array is recorded in the container
//! header, so a file can always be decoded regardless of how the reading
//! store is configured.

use crate::error::{RecorderError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Identifies a codec in configs and container headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    /// Bytes stored as they are
    None,
    /// gzip via flate2
    #[default]
    Gzip,
}

impl std::fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionKind::None => write!(f, "none"),
            CompressionKind::Gzip => write!(f, "gzip"),
        }
    }
}

/// Encodes and decodes array payload bytes
pub trait Codec: Send + Sync {
    /// Which codec this is
    fn kind(&self) -> CompressionKind;

    /// Encode raw bytes
    fn encode(&self, raw: &[u8]) -> Result<Vec<u8>>;

    /// Decode bytes; `expected_len` is the raw size recorded in the header
    fn decode(&self, encoded: &[u8], expected_len: usize) -> Result<Vec<u8>>;
}

/// Stores payloads uncompressed
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::None
    }

    fn encode(&self, raw: &[u8]) -> Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decode(&self, encoded: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        if encoded.len() != expected_len {
            return Err(RecorderError::Codec(format!(
                "raw payload is {} bytes, expected {}",
                encoded.len(),
                expected_len
            )));
        }
        Ok(encoded.to_vec())
    }
}

/// gzip compression at a fixed level
#[derive(Debug, Clone, Copy)]
pub struct GzipCodec {
    level: u32,
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_COMPRESSION_LEVEL)
    }
}

impl GzipCodec {
    /// Create a codec; the level is clamped to 0-9
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }

    /// Compression level in use
    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Codec for GzipCodec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Gzip
    }

    fn encode(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(raw)
            .map_err(|e| RecorderError::Codec(format!("gzip encode failed: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| RecorderError::Codec(format!("gzip encode failed: {}", e)))
    }

    fn decode(&self, encoded: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        // The declared size comes from the file, so neither it nor the
        // stream is trusted for allocation
        let limit = (expected_len as u64).saturating_add(1);
        let mut decoder = GzDecoder::new(encoded).take(limit);
        let mut out = Vec::with_capacity(expected_len.min(encoded.len().saturating_mul(64)));
        decoder
            .read_to_end(&mut out)
            .map_err(|e| RecorderError::Codec(format!("gzip decode failed: {}", e)))?;
        if out.len() != expected_len {
            return Err(RecorderError::Codec(format!(
                "gzip payload decoded to {} bytes, expected {}",
                out.len(),
                expected_len
            )));
        }
        Ok(out)
    }
}

/// Construct the codec for a kind
pub fn codec_for(kind: CompressionKind, level: u32) -> Box<dyn Codec> {
    match kind {
        CompressionKind::None => Box::new(RawCodec),
        CompressionKind::Gzip => Box::new(GzipCodec::new(level)),
    }
}
