//! Testing utilities and mock implementations.
//!
//! This module provides mock byte sources and validators, allowing the
//! queues, the tee and the ingest pipeline to be exercised without real
//! uploads.
//!
//! # Example
//!
//! ```rust,ignore
//! use intake_core::testing::{fixtures, MockSource, MockValidator};
//!
//! let source = MockSource::new(fixtures::pattern(2048)).with_max_read(512);
//! let validator = MockValidator::new();
//! validator.set_next_rejection("bad magic").await;
//! ```

mod mock_source;
mod mock_validator;

pub use mock_source::MockSource;
pub use mock_validator::MockValidator;

/// Test fixtures and helper functions.
pub mod fixtures {
    use sha2::{Digest, Sha256};

    /// Deterministic, non-repeating-at-1KiB byte pattern.
    pub fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Bytes that start with a PDF signature.
    pub fn pdf_bytes(len: usize) -> Vec<u8> {
        let mut data = b"%PDF-1.7\n".to_vec();
        data.extend(pattern(len.saturating_sub(data.len())));
        data.truncate(len);
        data
    }

    /// Lowercase hex SHA-256 of `data`.
    pub fn sha256_hex(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

}
