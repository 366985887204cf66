//! A signer that does not sign urls.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{SignedUrl, SignerError, UrlSigner};

/// A signer that returns the path unchanged.
///
/// Useful for tests and for storage that is already publicly readable;
/// the returned url still carries the configured validity window so that
/// clients refresh on schedule.
#[derive(Debug)]
pub struct NoopSigner {
    ttl: Duration,
}

impl NoopSigner {
    /// Create a new noop signer with the given url lifetime.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

#[async_trait]
impl UrlSigner for NoopSigner {
    async fn sign_url(&self, path: &str) -> Result<SignedUrl, SignerError> {
        Ok(SignedUrl::new(path, Utc::now(), self.ttl))
    }
}
