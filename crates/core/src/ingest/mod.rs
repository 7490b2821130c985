//! Upload ingest pipeline.
//!
//! Composes the admission queue, the stream tee and the work queues into
//! one flow per upload:
//! 1. Wait for a slot in the admission window
//! 2. Read the header and pass it to a [`HeaderValidator`]
//! 3. Persist the stream to a partial file while digesting it
//! 4. Move the file to `<root>/<digest[..2]>/<digest>`, or drop it if that
//!    content is already stored
//! 5. Append the result to the manifest
//!
//! # Example
//!
//! ```ignore
//! use intake_core::ingest::{AcceptAll, IngestConfig, IngestPipeline, IngestRequest};
//!
//! let pipeline = IngestPipeline::new(IngestConfig::default(), TeeConfig::default(), Arc::new(AcceptAll))?;
//! let file = tokio::fs::File::open("scan.pdf").await?;
//! let result = pipeline.ingest(IngestRequest::new("scan.pdf", file, len)).await?;
//! println!("{} -> {}", result.digest, result.path.display());
//! ```

mod config;
mod error;
mod manifest;
mod pipeline;
mod types;
mod validator;

pub use config::IngestConfig;
pub use error::IngestError;
pub use manifest::ManifestWriter;
pub use pipeline::IngestPipeline;
pub use types::{IngestRequest, IngestResult, IngestStatus};
pub use validator::{AcceptAll, HeaderValidator, PrefixValidator, OCTET_STREAM};
