//! Authentication middleware for public access.

use std::task::{Context, Poll};

use axum::extract::Request;
use tower::{Layer, Service};

use crate::auth::RecipientId;

/// Authentication middleware that does not perform any authentication.
///
/// Every request is served as the anonymous recipient. Used when
/// `authEnabled` is false; development only.
#[derive(Clone, Default)]
pub struct PublicAccessAuthLayer;

impl PublicAccessAuthLayer {
    /// Create a new public access layer.
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for PublicAccessAuthLayer {
    type Service = PublicAccessAuth<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PublicAccessAuth { inner }
    }
}

/// Service produced by [`PublicAccessAuthLayer`].
#[derive(Clone)]
pub struct PublicAccessAuth<S> {
    inner: S,
}

impl<S> Service<Request> for PublicAccessAuth<S>
where
    S: Service<Request> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let recipient_id = RecipientId::anonymous();
        tracing::debug!(recipient_id = %recipient_id, "public access");
        req.extensions_mut().insert(recipient_id);
        self.inner.call(req)
    }
}
