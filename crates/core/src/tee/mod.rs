//! Single-pass stream tee.
//!
//! A [`StreamTee`] reads a non-seekable source exactly once and serves three
//! views of that pass:
//! - the header (first `header_size` bytes) for magic-byte validation
//! - a digest over the whole stream for content addressing
//! - an output stream that replays every byte for persistence
//!
//! # Example
//!
//! ```ignore
//! use intake_core::tee::{StreamTee, TeeConfig};
//!
//! let tee = StreamTee::new(body, content_length, TeeConfig::default())?;
//! let header = tee.header().await;
//! validate(&header)?;
//! tee.write_file(&temp_path).await?;
//! let digest = tee.digest().await?;
//! ```

mod config;
mod digest;
mod error;
mod output;
mod stream;

pub use config::TeeConfig;
pub use digest::{DigestAlgorithm, StreamHasher};
pub use error::TeeError;
pub use output::TeeOutput;
pub use stream::StreamTee;
