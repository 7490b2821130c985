//! Mock header validator for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::ingest::{HeaderValidator, IngestError, OCTET_STREAM};

/// Mock implementation of the HeaderValidator trait.
///
/// Provides controllable behavior for testing:
/// - Record every header passed in
/// - Reject the next upload with a given reason
/// - Report a fixed media type
/// - Simulate slow validation
///
/// # Example
///
/// ```rust,ignore
/// use intake_core::testing::MockValidator;
///
/// let validator = MockValidator::new();
/// validator.set_next_rejection("checksum mismatch").await;
///
/// let headers = validator.recorded_headers().await;
/// ```
#[derive(Debug, Clone)]
pub struct MockValidator {
    headers: Arc<RwLock<Vec<Vec<u8>>>>,
    next_rejection: Arc<RwLock<Option<String>>>,
    media_type: Arc<RwLock<String>>,
    delay: Arc<RwLock<Duration>>,
}

impl Default for MockValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockValidator {
    /// Create a validator that accepts everything as octet-stream.
    pub fn new() -> Self {
        Self {
            headers: Arc::new(RwLock::new(Vec::new())),
            next_rejection: Arc::new(RwLock::new(None)),
            media_type: Arc::new(RwLock::new(OCTET_STREAM.to_string())),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
        }
    }

    /// Get all headers seen so far.
    pub async fn recorded_headers(&self) -> Vec<Vec<u8>> {
        self.headers.read().await.clone()
    }

    /// Get the number of validations performed.
    pub async fn validation_count(&self) -> usize {
        self.headers.read().await.len()
    }

    /// Reject the next upload with `reason`.
    pub async fn set_next_rejection(&self, reason: impl Into<String>) {
        *self.next_rejection.write().await = Some(reason.into());
    }

    /// Set the media type reported for accepted uploads.
    pub async fn set_media_type(&self, media_type: impl Into<String>) {
        *self.media_type.write().await = media_type.into();
    }

    /// Set the simulated validation time.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }
}

#[async_trait]
impl HeaderValidator for MockValidator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn validate(&self, header: &[u8]) -> Result<String, IngestError> {
        self.headers.write().await.push(header.to_vec());

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = self.next_rejection.write().await.take() {
            return Err(IngestError::rejected(self.name(), reason));
        }
        Ok(self.media_type.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_rejects_once() {
        let validator = MockValidator::new();
        validator.set_next_rejection("nope").await;

        assert!(validator.validate(b"one").await.is_err());
        assert_eq!(validator.validate(b"two").await.unwrap(), OCTET_STREAM);
        assert_eq!(
            validator.recorded_headers().await,
            vec![b"one".to_vec(), b"two".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_media_type_override() {
        let validator = MockValidator::new();
        validator.set_media_type("image/png").await;
        assert_eq!(validator.validate(b"").await.unwrap(), "image/png");
        assert_eq!(validator.validation_count().await, 1);
    }
}
