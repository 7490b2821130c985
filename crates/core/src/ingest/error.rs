//! Error types for the ingest module.

use std::path::PathBuf;
use thiserror::Error;

use crate::admission::{AdmissionError, TicketId};
use crate::tee::TeeError;

/// Errors that can occur while ingesting an upload.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The ticket was removed before it reached the active window.
    #[error("Upload was not admitted: {0}")]
    NotAdmitted(TicketId),

    /// The header validator refused the upload.
    #[error("Upload rejected by {validator}: {reason}")]
    Rejected { validator: String, reason: String },

    /// Streaming the upload failed.
    #[error("Stream failed: {0}")]
    Stream(#[from] TeeError),

    /// Failed to create a storage directory.
    #[error("Failed to create directory: {path}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to move the finished upload into the store.
    #[error("Failed to move {source_path} to {destination}")]
    MoveFailed {
        source_path: PathBuf,
        destination: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// Invalid pipeline configuration.
    #[error("Invalid ingest configuration: {0}")]
    InvalidConfig(String),
}

impl From<AdmissionError> for IngestError {
    fn from(e: AdmissionError) -> Self {
        Self::InvalidConfig(e.to_string())
    }
}

impl IngestError {
    /// Creates a rejection error.
    pub fn rejected(validator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            validator: validator.into(),
            reason: reason.into(),
        }
    }

    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotAdmitted(_) => "not_admitted",
            Self::Rejected { .. } => "rejected",
            Self::Stream(_) => "stream",
            Self::DirectoryCreationFailed { .. } | Self::MoveFailed { .. } => "storage",
            Self::InvalidConfig(_) => "config",
        }
    }
}
