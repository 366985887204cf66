//! Bearer token authentication middleware.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::header::AUTHORIZATION;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::future::BoxFuture;
use tower::{Layer, Service};

use crate::auth::{RecipientId, TokenStore, DEFAULT_RECIPIENT};
use crate::config::ServerConfig;
use crate::error::ServerError;

/// How presented bearer tokens are validated.
#[derive(Clone)]
enum TokenValidation {
    /// Compare against a single statically configured token.
    Static(String),
    /// Resolve through the external user service.
    Store(Arc<dyn TokenStore>),
    /// Accept any non-empty token. Development mode only.
    AcceptAny,
}

/// Authentication middleware validating `Authorization: Bearer` headers.
///
/// Requests without a bearer token are rejected with `401 UNAUTHENTICATED`
/// before the inner service runs; authenticated requests carry the
/// resolved [`RecipientId`] in their extensions.
#[derive(Clone)]
pub struct BearerAuthLayer {
    validation: TokenValidation,
}

impl BearerAuthLayer {
    /// Validate against a single shared token.
    pub fn with_static_token(token: impl Into<String>) -> Self {
        Self {
            validation: TokenValidation::Static(token.into()),
        }
    }

    /// Validate through a token store.
    pub fn with_token_store(store: Arc<dyn TokenStore>) -> Self {
        Self {
            validation: TokenValidation::Store(store),
        }
    }

    /// Accept any non-empty token. Every authenticated request is logged
    /// with a warning; never use this outside local development.
    pub fn accept_any() -> Self {
        Self {
            validation: TokenValidation::AcceptAny,
        }
    }

    /// Derive the validation mode from the server configuration and an
    /// optional token store.
    pub fn from_config(config: &ServerConfig, store: Option<Arc<dyn TokenStore>>) -> Self {
        match (&config.configured_bearer_token, store) {
            (Some(token), _) if !token.is_empty() => Self::with_static_token(token),
            (_, Some(store)) => Self::with_token_store(store),
            _ => Self::accept_any(),
        }
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuth<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuth {
            inner,
            validation: self.validation.clone(),
        }
    }
}

/// Service produced by [`BearerAuthLayer`].
#[derive(Clone)]
pub struct BearerAuth<S> {
    inner: S,
    validation: TokenValidation,
}

impl<S> Service<Request> for BearerAuth<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let validation = self.validation.clone();
        // take the ready service, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let token = match extract_bearer_token(&req) {
                Some(token) => token,
                None => {
                    return Ok(ServerError::unauthenticated(
                        "Missing or invalid Authorization header",
                    )
                    .into_response())
                }
            };

            match validate(&validation, &token).await {
                Ok(recipient_id) => {
                    tracing::debug!(recipient_id = %recipient_id, "authenticated");
                    req.extensions_mut().insert(recipient_id);
                    inner.call(req).await
                }
                Err(err) => Ok(err.into_response()),
            }
        })
    }
}

/// Extract the raw token from an `Authorization: Bearer <token>` header.
/// Any other scheme, or an empty token, yields `None`.
fn extract_bearer_token(req: &Request) -> Option<String> {
    let header = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_owned())
    }
}

async fn validate(validation: &TokenValidation, token: &str) -> Result<RecipientId, ServerError> {
    match validation {
        TokenValidation::Static(expected) => {
            if token == expected {
                Ok(RecipientId::known(DEFAULT_RECIPIENT))
            } else {
                Err(ServerError::unauthenticated("invalid bearer token"))
            }
        }
        TokenValidation::Store(store) => {
            let principal = store.principal_for_token(token).await.map_err(|e| {
                tracing::error!(error = %e, "token store lookup failed");
                ServerError::unavailable("the authentication service is unavailable")
            })?;
            match principal {
                Some(p) if !p.is_active() => {
                    Err(ServerError::unauthenticated("the recipient is not active"))
                }
                Some(p)
                    if p.token_expires_at()
                        .map(|exp| exp <= Utc::now())
                        .unwrap_or(false) =>
                {
                    Err(ServerError::unauthenticated("the bearer token has expired"))
                }
                Some(p) => Ok(RecipientId::known(p.name())),
                None => Err(ServerError::unauthenticated("invalid bearer token")),
            }
        }
        TokenValidation::AcceptAny => {
            tracing::warn!(
                "no bearer token or token store configured; accepting any token (development mode)"
            );
            Ok(RecipientId::known(DEFAULT_RECIPIENT))
        }
    }
}
