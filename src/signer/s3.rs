//! UrlSigner for S3 object paths.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::{presigning::PresigningConfig, Client};
use url::Url;

use super::{SignedUrl, SignerError, UrlSigner};

/// Signing configuration for the S3 object store.
pub struct S3UrlSigner {
    client: Client,
    ttl: Duration,
}

impl S3UrlSigner {
    /// Create a new `S3UrlSigner` from the provided S3 SDK client.
    pub fn new(client: Client, ttl: Duration) -> Self {
        Self { client, ttl }
    }
}

#[async_trait]
impl UrlSigner for S3UrlSigner {
    async fn sign_url(&self, path: &str) -> Result<SignedUrl, SignerError> {
        let url = Url::parse(path)
            .map_err(|e| SignerError::new(format!("`{path}` is not a valid object url: {e}")))?;
        let bucket = url
            .host_str()
            .ok_or_else(|| SignerError::new(format!("`{path}` has no bucket")))?;
        let key = url.path().trim_start_matches('/');

        let presign_config = PresigningConfig::expires_in(self.ttl)
            .map_err(|e| SignerError::new(format!("invalid presigning window: {e}")))?;
        let req = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presign_config.clone())
            .await
            .map_err(|e| SignerError::new(format!("could not presign `{path}`: {e}")))?;

        Ok(SignedUrl::new(
            req.uri().to_string(),
            presign_config.start_time().into(),
            presign_config.expires(),
        ))
    }
}
