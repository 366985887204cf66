//! Recipient identity and authentication middleware.
//!
//! Every request carries a [`RecipientId`] in its extensions, inserted by
//! one of the authentication layers: [`bearer::BearerAuthLayer`] validates
//! `Authorization: Bearer` tokens, [`public::PublicAccessAuthLayer`] waves
//! everyone through as an anonymous recipient (development only).

use std::{
    fmt::{self, Display},
    ops::Deref,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod bearer;
pub mod public;

/// Principal name used for recipients authenticated by a shared static
/// token or in development mode.
pub const DEFAULT_RECIPIENT: &str = "delta-sharing-user";

/// Recipient identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum RecipientId {
    /// Anonymous recipient identifier.
    Anonymous,
    /// Known recipient identifier.
    Known(String),
}

impl RecipientId {
    /// Create a new anonymous recipient identifier.
    pub fn anonymous() -> Self {
        Self::Anonymous
    }

    /// Create a new known recipient identifier.
    pub fn known(id: impl Into<String>) -> Self {
        Self::Known(id.into())
    }

    /// Get the recipient identifier as a string.
    pub fn as_str(&self) -> &str {
        self
    }
}

impl Default for RecipientId {
    fn default() -> Self {
        Self::Anonymous
    }
}

impl AsRef<str> for RecipientId {
    fn as_ref(&self) -> &str {
        self
    }
}

impl Deref for RecipientId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        match self {
            RecipientId::Anonymous => "ANONYMOUS",
            RecipientId::Known(id) => id.as_str(),
        }
    }
}

impl Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A principal resolved from a bearer token by the external user service.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPrincipal {
    name: String,
    active: bool,
    token_expires_at: Option<DateTime<Utc>>,
}

impl TokenPrincipal {
    /// Create a new principal.
    pub fn new(name: impl Into<String>, active: bool) -> Self {
        Self {
            name: name.into(),
            active,
            token_expires_at: None,
        }
    }

    /// Set the expiry of the token that resolved to this principal.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.token_expires_at = Some(expires_at);
        self
    }

    /// Name of the principal.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the principal is active.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Expiry of the token, if any.
    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.token_expires_at
    }
}

/// Store resolving opaque bearer tokens to principals.
///
/// Implemented by the external user service; the sharing core only ever
/// calls [`principal_for_token`](TokenStore::principal_for_token) and never
/// retains the token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Resolve a bearer token to a principal, or `None` when the token is
    /// unknown.
    async fn principal_for_token(
        &self,
        token: &str,
    ) -> Result<Option<TokenPrincipal>, TokenStoreError>;
}

/// Error raised when the token store could not be reached.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenStoreError {
    message: String,
}

impl TokenStoreError {
    /// Create a new error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for TokenStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TokenStoreError {}
