//! Request, result and status types for ingest.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::admission::AdmissionSnapshot;
use crate::tee::DigestAlgorithm;

/// One upload to ingest.
#[derive(Debug)]
pub struct IngestRequest<R> {
    /// Client-facing name, used for logging and the manifest.
    pub name: String,
    /// Upload session key; lets a client cancel a queued upload.
    pub session: Option<String>,
    /// Declared length, or 0 if unknown.
    pub expected_len: u64,
    /// The upload body.
    pub source: R,
}

impl<R> IngestRequest<R> {
    pub fn new(name: impl Into<String>, source: R, expected_len: u64) -> Self {
        Self {
            name: name.into(),
            session: None,
            expected_len,
            source,
        }
    }

    /// Attach a session key.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }
}

/// A stored upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestResult {
    pub name: String,
    /// Lowercase hex digest of the full content.
    pub digest: String,
    pub algorithm: DigestAlgorithm,
    pub bytes: u64,
    /// Content-addressed location in the store.
    pub path: PathBuf,
    pub media_type: String,
    /// Identical content was already stored; nothing new was written.
    pub deduplicated: bool,
    pub ingested_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Point-in-time view of a pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct IngestStatus {
    pub admission: AdmissionSnapshot,
    /// Ingests that have been submitted and not yet returned.
    pub in_progress: usize,
    pub completed: u64,
    pub failed: u64,
    pub deduplicated: u64,
    pub bytes_stored: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = IngestRequest::new("scan.pdf", (), 2048).with_session("sess-1");
        assert_eq!(request.name, "scan.pdf");
        assert_eq!(request.session.as_deref(), Some("sess-1"));
        assert_eq!(request.expected_len, 2048);
    }

    #[test]
    fn test_result_serializes() {
        let result = IngestResult {
            name: "a.bin".to_string(),
            digest: "ab".repeat(32),
            algorithm: DigestAlgorithm::Sha256,
            bytes: 3,
            path: PathBuf::from("/store/ab/abab"),
            media_type: "application/octet-stream".to_string(),
            deduplicated: false,
            ingested_at: Utc::now(),
            duration_ms: 5,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["algorithm"], "sha256");
        assert_eq!(json["bytes"], 3);
        assert_eq!(json["deduplicated"], false);
    }
}
