//! Traits and types for creating pre-signed urls.
//!
//! Data files are handed to recipients as time-bounded urls. A
//! [`UrlSigner`] turns a storage path into such a url; the
//! [`registry::SignerRegistry`] picks the signer matching the storage
//! scheme of a table.

use std::time::Duration;
use std::{error::Error, fmt::Display};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod file;
pub mod noop;
pub mod registry;
pub mod s3;

/// A signed url together with its validity window.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedUrl {
    url: String,
    valid_from: DateTime<Utc>,
    valid_duration: Duration,
}

impl SignedUrl {
    /// Create a new signed url.
    pub fn new(url: impl Into<String>, valid_from: DateTime<Utc>, valid_duration: Duration) -> Self {
        Self {
            url: url.into(),
            valid_from,
            valid_duration,
        }
    }

    /// The signed url.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start of the validity window.
    pub fn valid_from(&self) -> DateTime<Utc> {
        self.valid_from
    }

    /// End of the validity window.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.valid_from + chrono::Duration::milliseconds(self.valid_duration.as_millis() as i64)
    }

    /// End of the validity window in epoch milliseconds.
    pub fn expiration_timestamp_millis(&self) -> i64 {
        self.expires_at().timestamp_millis()
    }
}

/// Trait implemented by object store clients to derive a pre-signed url
/// from a storage path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UrlSigner: Send + Sync {
    /// Create a pre-signed url for the file at the given storage path.
    async fn sign_url(&self, path: &str) -> Result<SignedUrl, SignerError>;
}

/// Error that occurred while signing a url.
#[derive(Debug, Clone, PartialEq)]
pub struct SignerError {
    message: String,
}

impl SignerError {
    /// Create a new error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Message of the error.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for SignerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for SignerError {}
