//! UrlSigner for filesystem-backed tables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{SignedUrl, SignerError, UrlSigner};

/// Signer for tables stored on a local filesystem.
///
/// Maps file paths under a served root directory onto a public
/// file-serving base url. The embedding server is expected to serve the
/// root at that url, e.g. through `tower_http::services::ServeDir`.
#[derive(Debug)]
pub struct LocalFileSigner {
    serve_root: PathBuf,
    base_url: String,
    ttl: Duration,
}

impl LocalFileSigner {
    /// Create a new signer mapping `serve_root` onto `base_url`.
    pub fn new<P: AsRef<Path>>(serve_root: P, base_url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            serve_root: PathBuf::from(serve_root.as_ref()),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            ttl,
        }
    }
}

#[async_trait]
impl UrlSigner for LocalFileSigner {
    async fn sign_url(&self, path: &str) -> Result<SignedUrl, SignerError> {
        let path = path.strip_prefix("file://").unwrap_or(path);
        let relative = Path::new(path).strip_prefix(&self.serve_root).map_err(|_| {
            SignerError::new(format!(
                "`{path}` is outside the served root `{}`",
                self.serve_root.display()
            ))
        })?;

        let mut url = self.base_url.clone();
        for segment in relative.components() {
            url.push('/');
            url.push_str(&segment.as_os_str().to_string_lossy());
        }

        Ok(SignedUrl::new(url, Utc::now(), self.ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn maps_paths_onto_the_base_url() {
        let signer = LocalFileSigner::new(
            "/data/tables",
            "http://localhost:8080/files/",
            Duration::from_secs(900),
        );
        let signed = signer
            .sign_url("/data/tables/sales/part-0.parquet")
            .await
            .unwrap();
        assert_eq!(
            signed.url(),
            "http://localhost:8080/files/sales/part-0.parquet"
        );
        assert!(signed.expiration_timestamp_millis() > Utc::now().timestamp_millis());
    }

    #[tokio::test]
    async fn rejects_paths_outside_the_root() {
        let signer = LocalFileSigner::new(
            "/data/tables",
            "http://localhost:8080/files",
            Duration::from_secs(900),
        );
        assert!(signer.sign_url("/etc/passwd").await.is_err());
    }
}
