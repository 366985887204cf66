//! Response synthesis for the protocol surface.
//!
//! Catalog endpoints answer plain json; the table metadata, query and
//! changes endpoints answer NDJSON streams in one of two response-format
//! families, assembled by the [`parquet`] and [`delta`] submodules. The
//! body is a lazy sequence of lines: each line is serialized and flushed
//! on its own, file urls are signed one file per emitted line, slow
//! clients exert backpressure, and a disconnect stops further signing.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue};
use axum::response::Response;
use axum::{
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde::Serialize;

use crate::catalog::{Page, Schema as SchemaInfo, Share as ShareInfo, Table as TableInfo};
use crate::reader::action::{Format, Metadata};
use crate::reader::TableVersionNumber;
use crate::signer::UrlSigner;

pub mod delta;
pub mod parquet;

use delta::DeltaResponse;
use parquet::ParquetResponse;

static DELTA_TABLE_VERSION: HeaderName = HeaderName::from_static("delta-table-version");
static DELTA_SHARING_CAPABILITIES: HeaderName =
    HeaderName::from_static("delta-sharing-capabilities");

/// A share as rendered on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

impl From<ShareInfo> for Share {
    fn from(value: ShareInfo) -> Self {
        Self {
            name: value.name().to_owned(),
            id: value.id().map(|id| id.to_owned()),
        }
    }
}

/// Response of the list shares endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSharesResponse {
    items: Vec<Share>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<String>,
}

impl From<Page<ShareInfo>> for ListSharesResponse {
    fn from(value: Page<ShareInfo>) -> Self {
        let (items, next_page_token) = value.into_parts();

        Self {
            items: items.into_iter().map(Share::from).collect(),
            next_page_token,
        }
    }
}

impl IntoResponse for ListSharesResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            Json(self),
        )
            .into_response()
    }
}

/// Response of the get share endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetShareResponse {
    share: Share,
}

impl From<ShareInfo> for GetShareResponse {
    fn from(value: ShareInfo) -> Self {
        Self {
            share: value.into(),
        }
    }
}

impl IntoResponse for GetShareResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            Json(self),
        )
            .into_response()
    }
}

/// A schema as rendered on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    name: String,
    share: String,
}

impl From<SchemaInfo> for Schema {
    fn from(value: SchemaInfo) -> Self {
        Self {
            name: value.name().to_owned(),
            share: value.share_name().to_owned(),
        }
    }
}

/// Response of the list schemas endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSchemasResponse {
    items: Vec<Schema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<String>,
}

impl From<Page<SchemaInfo>> for ListSchemasResponse {
    fn from(value: Page<SchemaInfo>) -> Self {
        let (items, next_page_token) = value.into_parts();

        Self {
            items: items.into_iter().map(Schema::from).collect(),
            next_page_token,
        }
    }
}

impl IntoResponse for ListSchemasResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            Json(self),
        )
            .into_response()
    }
}

/// A table as rendered on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    name: String,
    schema: String,
    share: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    share_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

impl From<TableInfo> for Table {
    fn from(value: TableInfo) -> Self {
        Self {
            name: value.name().to_owned(),
            schema: value.schema_name().to_owned(),
            share: value.share_name().to_owned(),
            share_id: value.share_id().map(ToOwned::to_owned),
            id: value.id().map(ToOwned::to_owned),
        }
    }
}

/// Response of the list tables endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTablesResponse {
    items: Vec<Table>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<String>,
}

impl From<Page<TableInfo>> for ListTablesResponse {
    fn from(value: Page<TableInfo>) -> Self {
        let (items, next_page_token) = value.into_parts();

        Self {
            items: items.into_iter().map(Table::from).collect(),
            next_page_token,
        }
    }
}

impl IntoResponse for ListTablesResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            Json(self),
        )
            .into_response()
    }
}

/// Response of the table version endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableVersionResponse {
    delta_table_version: u64,
}

impl From<TableVersionNumber> for TableVersionResponse {
    fn from(version: TableVersionNumber) -> Self {
        Self {
            delta_table_version: version.version(),
        }
    }
}

impl IntoResponse for TableVersionResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [
                (
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json; charset=utf-8"),
                ),
                (
                    DELTA_TABLE_VERSION.clone(),
                    HeaderValue::from(self.delta_table_version),
                ),
            ],
            Json(self),
        )
            .into_response()
    }
}

/// The table metadata fields shared by both response formats.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MetadataFields {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    format: FormatFields,
    schema_string: String,
    partition_columns: Vec<String>,
    // always present on the wire, possibly empty
    configuration: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct FormatFields {
    provider: String,
    // always present on the wire, possibly empty
    options: HashMap<String, String>,
}

impl From<&Format> for FormatFields {
    fn from(format: &Format) -> Self {
        Self {
            provider: format.provider.clone(),
            options: format.options.clone(),
        }
    }
}

impl From<&Metadata> for MetadataFields {
    fn from(metadata: &Metadata) -> Self {
        Self {
            id: metadata.id.clone(),
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            format: FormatFields::from(&metadata.format),
            schema_string: metadata.schema_string.clone(),
            partition_columns: metadata.partition_columns.clone(),
            configuration: metadata.configuration.clone(),
            created_time: metadata.created_time,
        }
    }
}

/// The optional trailing line of an NDJSON stream.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndStreamAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_url_expiration_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl EndStreamAction {
    pub(crate) fn new(min_url_expiration_timestamp: Option<i64>) -> Self {
        Self {
            min_url_expiration_timestamp,
            ..Default::default()
        }
    }

    /// A terminal failure after bytes were already flushed.
    pub(crate) fn failed(
        min_url_expiration_timestamp: Option<i64>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            min_url_expiration_timestamp,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Signing configuration attached to a streamed response.
#[derive(Clone)]
pub(crate) struct Signing {
    table_root: String,
    signer: Arc<dyn UrlSigner>,
}

impl Signing {
    pub(crate) fn new(table_root: &str, signer: Arc<dyn UrlSigner>) -> Self {
        Self {
            table_root: table_root.to_owned(),
            signer,
        }
    }
}

impl std::fmt::Debug for Signing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signing")
            .field("table_root", &self.table_root)
            .finish_non_exhaustive()
    }
}

/// A line of an NDJSON stream, possibly wrapping a data file whose url
/// still has to be signed.
pub(crate) trait SignableLine: Serialize + Send + Sized + 'static {
    /// Log-relative path of the wrapped file, if the line carries one.
    fn unsigned_path(&self) -> Option<String>;

    /// Install the signed url on the wrapped file.
    fn apply_signature(&mut self, signed: &crate::signer::SignedUrl);

    /// Wrap an end-stream action into a line.
    fn end_stream(action: EndStreamAction) -> Self;
}

struct LineStream<L> {
    lines: std::vec::IntoIter<L>,
    signing: Option<Signing>,
    include_end_stream_action: bool,
    min_url_expiration: Option<i64>,
    finished: bool,
}

/// Stream NDJSON lines into the response body, one flush per line.
///
/// File urls are signed lazily, one file per emitted line, so a client
/// that disconnects mid-stream stops further signing. A signing failure
/// after the prefix has been flushed cannot change the status anymore; it
/// is reported through `endStreamAction.errorMessage` when the client
/// enabled that variant, and aborts the connection otherwise.
pub(crate) fn ndjson_response<L: SignableLine>(
    version: u64,
    include_end_stream_action: bool,
    lines: Vec<L>,
    signing: Option<Signing>,
) -> Response {
    let state = LineStream {
        lines: lines.into_iter(),
        signing,
        include_end_stream_action,
        min_url_expiration: None,
        finished: false,
    };
    let stream = futures::stream::unfold(state, next_line);

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson; charset=utf-8"),
    );
    headers.insert(DELTA_TABLE_VERSION.clone(), HeaderValue::from(version));
    let capabilities = if include_end_stream_action {
        "responseformat=parquet,delta;includeendstreamaction=true"
    } else {
        "responseformat=parquet,delta"
    };
    headers.insert(
        DELTA_SHARING_CAPABILITIES.clone(),
        HeaderValue::from_static(capabilities),
    );
    response
}

type LineItem<L> = (Result<Bytes, std::io::Error>, LineStream<L>);

async fn next_line<L: SignableLine>(mut state: LineStream<L>) -> Option<LineItem<L>> {
    if state.finished {
        return None;
    }

    let Some(mut line) = state.lines.next() else {
        state.finished = true;
        if state.include_end_stream_action {
            let end = L::end_stream(EndStreamAction::new(state.min_url_expiration));
            return Some((serialize_line(&end), state));
        }
        return None;
    };

    if let (Some(path), Some(signing)) = (line.unsigned_path(), state.signing.as_ref()) {
        let storage_path = file_storage_path(&signing.table_root, &path);
        match signing.signer.sign_url(&storage_path).await {
            Ok(signed) => {
                let expiration = signed.expiration_timestamp_millis();
                state.min_url_expiration = Some(match state.min_url_expiration {
                    Some(current) => current.min(expiration),
                    None => expiration,
                });
                line.apply_signature(&signed);
            }
            Err(e) => {
                tracing::error!(error = %e, "could not sign a data file url");
                state.finished = true;
                if state.include_end_stream_action {
                    let end = L::end_stream(EndStreamAction::failed(
                        state.min_url_expiration,
                        "the server could not sign a data file url",
                    ));
                    return Some((serialize_line(&end), state));
                }
                return Some((Err(std::io::Error::other("url signing failed")), state));
            }
        }
    }

    Some((serialize_line(&line), state))
}

fn serialize_line<L: Serialize>(line: &L) -> Result<Bytes, std::io::Error> {
    serde_json::to_vec(line)
        .map(|mut buf| {
            buf.push(b'\n');
            Bytes::from(buf)
        })
        .map_err(std::io::Error::other)
}

/// Table actions rendered in the negotiated response format.
#[derive(Debug, Clone)]
pub enum TableActionsResponse {
    /// The parquet response format.
    Parquet(ParquetResponse),
    /// The delta response format.
    Delta(DeltaResponse),
}

impl TableActionsResponse {
    /// Wrap a parquet-format response.
    pub fn new_parquet(response: ParquetResponse) -> Self {
        Self::Parquet(response)
    }

    /// Wrap a delta-format response.
    pub fn new_delta(response: DeltaResponse) -> Self {
        Self::Delta(response)
    }

    /// The table version the response describes.
    pub fn version(&self) -> u64 {
        match self {
            TableActionsResponse::Parquet(response) => response.version(),
            TableActionsResponse::Delta(response) => response.version(),
        }
    }

    /// Attach the signer that will sign file urls as the response is
    /// streamed.
    pub fn with_signer(self, table_root: &str, signer: Arc<dyn UrlSigner>) -> Self {
        match self {
            TableActionsResponse::Parquet(response) => {
                TableActionsResponse::Parquet(response.with_signer(table_root, signer))
            }
            TableActionsResponse::Delta(response) => {
                TableActionsResponse::Delta(response.with_signer(table_root, signer))
            }
        }
    }

    /// Append the end-stream action to the stream.
    pub fn with_end_stream_action(self) -> Self {
        match self {
            TableActionsResponse::Parquet(response) => {
                TableActionsResponse::Parquet(response.with_end_stream_action())
            }
            TableActionsResponse::Delta(response) => {
                TableActionsResponse::Delta(response.with_end_stream_action())
            }
        }
    }
}

impl IntoResponse for TableActionsResponse {
    fn into_response(self) -> Response {
        match self {
            TableActionsResponse::Parquet(response) => response.into_response(),
            TableActionsResponse::Delta(response) => response.into_response(),
        }
    }
}

/// Join the table root and a log-relative file path into a storage path.
pub(crate) fn file_storage_path(table_root: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        table_root.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

/// Stable id of a file line, derived from the log-relative path.
pub(crate) fn file_id(path: &str) -> String {
    format!("{:x}", md5::compute(path.as_bytes()))
}
