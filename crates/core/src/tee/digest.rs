//! Digest algorithms used for content addressing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Algorithm used to fingerprint a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestAlgorithm {
    /// SHA-256 digest.
    #[default]
    Sha256,
    /// MD5 digest (faster, not collision resistant).
    Md5,
}

impl DigestAlgorithm {
    /// Starts an incremental hasher for this algorithm.
    pub fn hasher(self) -> StreamHasher {
        match self {
            Self::Sha256 => StreamHasher::Sha256(Sha256::new()),
            Self::Md5 => StreamHasher::Md5(md5::Context::new()),
        }
    }

    /// Digests a complete buffer; lowercase hex.
    pub fn digest(self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize_hex()
    }

    /// Length of the hex digest in characters.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Md5 => 32,
        }
    }
}

/// Incremental digest state.
pub enum StreamHasher {
    Sha256(Sha256),
    Md5(md5::Context),
}

impl StreamHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(hasher) => hasher.update(data),
            Self::Md5(context) => context.consume(data),
        }
    }

    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(hasher) => format!("{:x}", hasher.finalize()),
            Self::Md5(context) => format!("{:x}", context.compute()),
        }
    }
}

impl std::fmt::Debug for StreamHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha256(_) => f.write_str("StreamHasher::Sha256"),
            Self::Md5(_) => f.write_str("StreamHasher::Md5"),
        }
    }
}
