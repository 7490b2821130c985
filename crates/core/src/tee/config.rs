//! Configuration for the tee module.

use serde::{Deserialize, Serialize};

use super::digest::DigestAlgorithm;

/// Configuration for a stream tee session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeeConfig {
    /// Number of leading bytes captured as the header.
    #[serde(default = "default_header_size")]
    pub header_size: usize,

    /// Read buffer size for each pull from the source.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunks buffered towards the output consumer before reading pauses.
    #[serde(default = "default_output_buffer")]
    pub output_buffer: usize,

    /// Digest computed over the whole stream.
    #[serde(default)]
    pub digest: DigestAlgorithm,
}

fn default_header_size() -> usize {
    1024
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_output_buffer() -> usize {
    16
}

impl Default for TeeConfig {
    fn default() -> Self {
        Self {
            header_size: default_header_size(),
            chunk_size: default_chunk_size(),
            output_buffer: default_output_buffer(),
            digest: DigestAlgorithm::default(),
        }
    }
}

impl TeeConfig {
    /// Sets the header size.
    pub fn with_header_size(mut self, size: usize) -> Self {
        self.header_size = size;
        self
    }

    /// Sets the read chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the digest algorithm.
    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    /// Sets the output channel depth in chunks.
    pub fn with_output_buffer(mut self, chunks: usize) -> Self {
        self.output_buffer = chunks;
        self
    }
}
