//! Error types for the tee module.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while teeing a stream.
///
/// Cloneable so that every waiter on a digest observes the same failure.
#[derive(Debug, Clone, Error)]
pub enum TeeError {
    /// The source stream failed; the session is terminal.
    #[error("Source stream failed: {0}")]
    Source(Arc<io::Error>),

    /// Writing the output to a file failed.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// The output stream was already handed out.
    #[error("Output stream already taken")]
    OutputTaken,

    /// The tee was dropped before the source was fully read.
    #[error("Stream tee cancelled before the source ended")]
    Cancelled,

    /// Header or chunk size of zero.
    #[error("Invalid tee configuration: {0}")]
    InvalidConfig(String),
}

impl TeeError {
    pub(crate) fn write(path: impl Into<PathBuf>, error: io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source: Arc::new(error),
        }
    }

    /// Copies the error into a fresh `io::Error` for stream consumers.
    pub(crate) fn to_io(&self) -> io::Error {
        match self {
            Self::Source(e) | Self::Write { source: e, .. } => io::Error::new(e.kind(), e.to_string()),
            other => io::Error::other(other.to_string()),
        }
    }
}
