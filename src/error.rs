//! Server error type and the mapping onto protocol error bodies.
//!
//! Subsystem errors ([`CatalogError`], [`TableReaderError`]) are
//! converted into a single [`ServerError`] at the http boundary, which
//! renders the protocol error body `{"errorCode": ..., "message": ...}`
//! with the matching status code. Signing errors never reach this
//! boundary: urls are signed while the response streams, so a failure
//! there surfaces inside the stream instead.

use axum::{http::header, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::{error::Error, fmt::Display};

use crate::catalog::{CatalogError, CatalogErrorKind};
use crate::reader::{TableReaderError, TableReaderErrorKind};

/// Result alias used by handlers and the server state.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Kind of a server error; decides status code and error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerErrorKind {
    /// The request carried no valid credentials.
    Unauthenticated,
    /// The recipient may not access the requested asset.
    Forbidden,
    /// The requested share, schema, table or version does not exist.
    ResourceNotFound,
    /// A request parameter, body or token could not be interpreted.
    InvalidParameter,
    /// The server failed internally.
    Internal,
    /// A backing service is temporarily unavailable.
    Unavailable,
}

/// Error returned by the sharing server handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerError {
    kind: ServerErrorKind,
    message: String,
}

impl ServerError {
    /// Create a new error with the specified kind and message.
    pub fn new(kind: ServerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Kind of the error.
    pub fn kind(&self) -> ServerErrorKind {
        self.kind
    }

    /// Message of the error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The request carried no valid credentials.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ServerErrorKind::Unauthenticated, message)
    }

    /// The recipient may not access the requested asset.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ServerErrorKind::Forbidden, message)
    }

    /// The requested asset does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ServerErrorKind::ResourceNotFound, message)
    }

    /// A request parameter could not be interpreted.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ServerErrorKind::InvalidParameter, message)
    }

    /// The server failed internally.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ServerErrorKind::Internal, message)
    }

    /// A backing service is temporarily unavailable.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ServerErrorKind::Unavailable, message)
    }

    fn status_code(&self) -> StatusCode {
        match self.kind {
            ServerErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServerErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ServerErrorKind::ResourceNotFound => StatusCode::NOT_FOUND,
            ServerErrorKind::InvalidParameter => StatusCode::BAD_REQUEST,
            ServerErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ServerErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_code(&self) -> &'static str {
        match self.kind {
            ServerErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ServerErrorKind::Forbidden => "PERMISSION_DENIED",
            ServerErrorKind::ResourceNotFound => "RESOURCE_DOES_NOT_EXIST",
            ServerErrorKind::InvalidParameter => "INVALID_PARAMETER_VALUE",
            ServerErrorKind::Internal => "INTERNAL_ERROR",
            ServerErrorKind::Unavailable => "TEMPORARILY_UNAVAILABLE",
        }
    }

    /// The protocol error body for this error. Internal details are
    /// sanitized; they are logged server-side instead.
    pub fn into_error_response(self) -> ErrorResponse {
        let error_code = String::from(self.error_code());
        let message = match self.kind {
            ServerErrorKind::Internal => String::from("an internal error occurred"),
            ServerErrorKind::Unavailable => {
                String::from("the service is temporarily unavailable")
            }
            _ => self.message,
        };
        ErrorResponse {
            error_code,
            message,
        }
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message)
    }
}

impl Error for ServerError {}

/// The wire shape of a protocol error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    error_code: String,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        match self.kind {
            ServerErrorKind::Internal | ServerErrorKind::Unavailable => {
                tracing::error!(error = %self, "request failed");
            }
            _ => {
                tracing::debug!(error = %self, "request rejected");
            }
        }
        (
            self.status_code(),
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            Json(self.into_error_response()),
        )
            .into_response()
    }
}

impl From<CatalogError> for ServerError {
    fn from(value: CatalogError) -> Self {
        match value.kind() {
            CatalogErrorKind::ResourceNotFound => ServerError::not_found(value.message()),
            CatalogErrorKind::ResourceForbidden => ServerError::forbidden(value.message()),
            CatalogErrorKind::MalformedPagination => {
                ServerError::invalid_parameter(value.message())
            }
            CatalogErrorKind::Unavailable => ServerError::unavailable(value.message()),
            CatalogErrorKind::Internal => ServerError::internal(value.message()),
        }
    }
}

impl From<TableReaderError> for ServerError {
    fn from(value: TableReaderError) -> Self {
        match value.kind() {
            TableReaderErrorKind::VersionNotFound => ServerError::not_found(value.message()),
            TableReaderErrorKind::CorruptLog | TableReaderErrorKind::IncompleteLog => {
                ServerError::internal(value.message())
            }
            TableReaderErrorKind::ChangeDataFeedDisabled
            | TableReaderErrorKind::InvalidVersionRange => {
                ServerError::invalid_parameter(value.message())
            }
            TableReaderErrorKind::Unavailable => ServerError::unavailable(value.message()),
            TableReaderErrorKind::Internal => ServerError::internal(value.message()),
        }
    }
}
