//! A registry of url signers keyed by storage scheme.

use std::time::Duration;
use std::{collections::HashMap, sync::Arc};

use super::{noop::NoopSigner, UrlSigner};

/// A registry of url signers.
///
/// Signers are registered per storage scheme (`s3`, `file`, ...); tables
/// with an unregistered scheme fall back to a [`NoopSigner`].
#[derive(Clone)]
pub struct SignerRegistry {
    registry: HashMap<String, Arc<dyn UrlSigner>>,
    fallback: Arc<dyn UrlSigner>,
}

impl SignerRegistry {
    /// Create a new signer registry. The url lifetime is used by the
    /// fallback signer.
    pub fn new(url_ttl: Duration) -> Self {
        Self {
            registry: HashMap::new(),
            fallback: Arc::new(NoopSigner::new(url_ttl)),
        }
    }

    /// Register a signer for a storage scheme.
    pub fn register(&mut self, scheme: &str, signer: Arc<dyn UrlSigner>) {
        self.registry.insert(scheme.to_string(), signer);
    }

    /// Get the signer for a storage scheme.
    pub fn get(&self, scheme: &str) -> Option<Arc<dyn UrlSigner>> {
        self.registry.get(scheme).cloned()
    }

    /// Get the signer for a storage scheme, or the fallback if none is
    /// registered.
    pub fn get_or_noop(&self, scheme: &str) -> Arc<dyn UrlSigner> {
        self.get(scheme).unwrap_or_else(|| self.fallback.clone())
    }
}
