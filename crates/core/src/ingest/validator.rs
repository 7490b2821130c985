//! Header validation seam.

use async_trait::async_trait;

use super::error::IngestError;

/// Media type reported for content no validator recognised.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Decides from the leading bytes whether an upload may be stored.
#[async_trait]
pub trait HeaderValidator: Send + Sync {
    /// Returns the name of this validator implementation.
    fn name(&self) -> &str;

    /// Returns the media type of the upload, or a rejection.
    async fn validate(&self, header: &[u8]) -> Result<String, IngestError>;
}

/// Accepts everything as `application/octet-stream`.
#[derive(Debug, Clone, Default)]
pub struct AcceptAll;

#[async_trait]
impl HeaderValidator for AcceptAll {
    fn name(&self) -> &str {
        "accept_all"
    }

    async fn validate(&self, _header: &[u8]) -> Result<String, IngestError> {
        Ok(OCTET_STREAM.to_string())
    }
}

/// Matches the header against a caller-supplied table of magic prefixes.
///
/// The first matching entry wins. Unknown content is rejected unless a
/// fallback type is set.
#[derive(Debug, Clone, Default)]
pub struct PrefixValidator {
    signatures: Vec<(Vec<u8>, String)>,
    fallback: Option<String>,
}

impl PrefixValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a signature.
    pub fn with_type(mut self, magic: impl Into<Vec<u8>>, media_type: impl Into<String>) -> Self {
        self.signatures.push((magic.into(), media_type.into()));
        self
    }

    /// Accepts unknown content as `media_type` instead of rejecting it.
    pub fn with_fallback(mut self, media_type: impl Into<String>) -> Self {
        self.fallback = Some(media_type.into());
        self
    }

    fn detect(&self, header: &[u8]) -> Option<&str> {
        self.signatures
            .iter()
            .find(|(magic, _)| header.starts_with(magic))
            .map(|(_, media_type)| media_type.as_str())
    }
}

#[async_trait]
impl HeaderValidator for PrefixValidator {
    fn name(&self) -> &str {
        "prefix"
    }

    async fn validate(&self, header: &[u8]) -> Result<String, IngestError> {
        if let Some(media_type) = self.detect(header) {
            return Ok(media_type.to_string());
        }
        match &self.fallback {
            Some(fallback) => Ok(fallback.clone()),
            None if header.is_empty() => Err(IngestError::rejected(self.name(), "empty upload")),
            None => Err(IngestError::rejected(self.name(), "unrecognised file type")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> PrefixValidator {
        PrefixValidator::new()
            .with_type(b"%PDF-".to_vec(), "application/pdf")
            .with_type(b"\x89PNG\r\n\x1a\n".to_vec(), "image/png")
    }

    #[tokio::test]
    async fn test_accept_all() {
        assert_eq!(AcceptAll.validate(b"").await.unwrap(), OCTET_STREAM);
    }

    #[tokio::test]
    async fn test_prefix_match() {
        let v = validator();
        assert_eq!(v.validate(b"%PDF-1.7\n...").await.unwrap(), "application/pdf");
        assert_eq!(
            v.validate(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR").await.unwrap(),
            "image/png"
        );
    }

    #[tokio::test]
    async fn test_unknown_rejected() {
        let err = validator().validate(b"MZ\x90\0").await.unwrap_err();
        assert!(matches!(err, IngestError::Rejected { .. }));

        let err = validator().validate(b"").await.unwrap_err();
        assert!(err.to_string().contains("empty upload"));
    }

    #[tokio::test]
    async fn test_fallback() {
        let v = validator().with_fallback("text/plain");
        assert_eq!(v.validate(b"hello").await.unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn test_header_shorter_than_magic() {
        let err = validator().validate(b"%P").await.unwrap_err();
        assert!(matches!(err, IngestError::Rejected { .. }));
    }
}
