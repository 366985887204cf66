//! Types and traits for accessing shared assets.
//!
//! Every Delta Sharing server needs to know which shares, schemas and
//! tables are available to be shared with a recipient, and where the table
//! data lives. The [`Catalog`] trait is the seam between the sharing core
//! and whatever backing store holds that information; this crate ships a
//! file-backed implementation in [`file`].

use async_trait::async_trait;
use base64::engine::general_purpose;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::{error::Error, fmt::Display};

use crate::auth::RecipientId;

pub mod file;

/// Interface for listing and reading shared assets.
///
/// Listing operations are paginated and must return a stable, name-ordered
/// sequence: the same inputs over an unchanged store yield the same pages,
/// and concatenating pages of any size equals the unpaginated listing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Return a page of shares accessible to the given recipient.
    async fn list_shares(
        &self,
        recipient_id: &RecipientId,
        pagination: &Pagination,
    ) -> Result<Page<Share>, CatalogError>;

    /// Return a page of schemas under the specified share.
    async fn list_schemas(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        pagination: &Pagination,
    ) -> Result<Page<Schema>, CatalogError>;

    /// Return a page of tables under the specified share, across all of
    /// its schemas.
    async fn list_tables_in_share(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        pagination: &Pagination,
    ) -> Result<Page<Table>, CatalogError>;

    /// Return a page of tables under the specified share and schema.
    async fn list_tables_in_schema(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        schema_name: &str,
        pagination: &Pagination,
    ) -> Result<Page<Table>, CatalogError>;

    /// Get share details by name.
    async fn get_share(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
    ) -> Result<Share, CatalogError>;

    /// Resolve a share + schema + table name combination to a table record.
    async fn get_table(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        schema_name: &str,
        table_name: &str,
    ) -> Result<Table, CatalogError>;
}

/// Pagination parameters for listing shared assets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    max_results: Option<u32>,
    page_token: Option<String>,
}

impl Pagination {
    /// Create a new pagination object with the specified maximum results
    /// and page token.
    pub fn new(max_results: Option<u32>, page_token: Option<String>) -> Self {
        Self {
            max_results,
            page_token,
        }
    }

    /// Maximum amount of results to be returned in a single page.
    pub fn max_results(&self) -> Option<u32> {
        self.max_results
    }

    /// Token to resume listing from a previous point in the collection.
    pub fn page_token(&self) -> Option<&str> {
        self.page_token.as_deref()
    }
}

/// A page of shared assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    items: Vec<T>,
    next_page_token: Option<String>,
}

impl<T> Page<T> {
    /// Create a new page with the specified items and continuation token.
    pub fn new(items: Vec<T>, next_page_token: Option<String>) -> Self {
        Self {
            items,
            next_page_token,
        }
    }

    /// The shared assets in the page.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Token to resume listing after this page, if more items remain.
    pub fn next_page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref()
    }

    /// Amount of shared assets in the page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the page holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Convert the page into its parts: items and token.
    pub fn into_parts(self) -> (Vec<T>, Option<String>) {
        (self.items, self.next_page_token)
    }
}

/// Information about a share stored in the [`Catalog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    id: Option<String>,
    name: String,
    description: Option<String>,
    active: bool,
}

impl Share {
    /// Create a new [`ShareBuilder`].
    pub fn builder() -> ShareBuilder {
        ShareBuilder::new()
    }

    /// Stable id of the share.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Name of the share.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-form description of the share.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Whether the share is visible to recipients.
    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// A builder for the [`Share`] type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShareBuilder {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    active: Option<bool>,
}

impl ShareBuilder {
    /// Create a new [`ShareBuilder`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the id of the share.
    pub fn id(mut self, share_id: impl Into<String>) -> Self {
        self.id = Some(share_id.into());
        self
    }

    /// Set the id of the share.
    pub fn set_id(mut self, share_id: Option<String>) -> Self {
        self.id = share_id;
        self
    }

    /// Set the name of the share.
    pub fn name(mut self, share_name: impl Into<String>) -> Self {
        self.name = Some(share_name.into());
        self
    }

    /// Set the description of the share.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the share active or inactive. Defaults to active.
    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    /// Build the share.
    pub fn build(self) -> Result<Share, CatalogError> {
        let Some(name) = self.name else {
            return Err(CatalogError::internal(
                "the required attribute `name` was not set",
            ));
        };
        if name.is_empty() {
            return Err(CatalogError::internal("the share name must be non-empty"));
        }

        Ok(Share {
            id: self.id,
            name,
            description: self.description,
            active: self.active.unwrap_or(true),
        })
    }
}

/// Information about a schema stored in the [`Catalog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    id: Option<String>,
    name: String,
    share_name: String,
    description: Option<String>,
}

impl Schema {
    /// Create a new [`SchemaBuilder`].
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Stable id of the schema.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Name of the schema.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the share containing the schema.
    pub fn share_name(&self) -> &str {
        &self.share_name
    }

    /// Free-form description of the schema.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// A builder for the [`Schema`] type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaBuilder {
    id: Option<String>,
    name: Option<String>,
    share_name: Option<String>,
    description: Option<String>,
}

impl SchemaBuilder {
    /// Create a new [`SchemaBuilder`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the id of the schema.
    pub fn id(mut self, schema_id: impl Into<String>) -> Self {
        self.id = Some(schema_id.into());
        self
    }

    /// Set the id of the schema.
    pub fn set_id(mut self, schema_id: Option<String>) -> Self {
        self.id = schema_id;
        self
    }

    /// Set the name of the schema.
    pub fn name(mut self, schema_name: impl Into<String>) -> Self {
        self.name = Some(schema_name.into());
        self
    }

    /// Set the name of the share containing the schema.
    pub fn share_name(mut self, share_name: impl Into<String>) -> Self {
        self.share_name = Some(share_name.into());
        self
    }

    /// Set the description of the schema.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Build the schema.
    pub fn build(self) -> Result<Schema, CatalogError> {
        let Some(name) = self.name else {
            return Err(CatalogError::internal(
                "the required attribute `name` was not set",
            ));
        };
        let Some(share_name) = self.share_name else {
            return Err(CatalogError::internal(
                "the required attribute `share_name` was not set",
            ));
        };

        Ok(Schema {
            id: self.id,
            name,
            share_name,
            description: self.description,
        })
    }
}

/// Information about a table stored in the [`Catalog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    id: Option<String>,
    name: String,
    share_id: Option<String>,
    share_name: String,
    schema_name: String,
    storage_location: String,
    format: String,
    share_as_view: bool,
}

impl Table {
    /// Create a new [`TableBuilder`].
    pub fn builder() -> TableBuilder {
        TableBuilder::new()
    }

    /// Stable id of the table.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Id of the share containing the table.
    pub fn share_id(&self) -> Option<&str> {
        self.share_id.as_deref()
    }

    /// Name of the table.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the schema containing the table.
    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    /// Name of the share containing the table.
    pub fn share_name(&self) -> &str {
        &self.share_name
    }

    /// Storage location of the table root; the directory that contains
    /// `_delta_log/`.
    pub fn storage_path(&self) -> &str {
        &self.storage_location
    }

    /// Data format of the shared table (`parquet` or `delta`).
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Whether the table is shared as a view.
    pub fn share_as_view(&self) -> bool {
        self.share_as_view
    }

    /// Key used for snapshot caching; falls back to the storage location
    /// for tables without a stable id.
    pub fn cache_key(&self) -> &str {
        self.id().unwrap_or(&self.storage_location)
    }
}

/// A builder for the [`Table`] type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableBuilder {
    id: Option<String>,
    share_id: Option<String>,
    name: Option<String>,
    share_name: Option<String>,
    schema_name: Option<String>,
    storage_path: Option<String>,
    format: Option<String>,
    share_as_view: Option<bool>,
}

impl TableBuilder {
    /// Create a new [`TableBuilder`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the id of the table.
    pub fn id(mut self, table_id: impl Into<String>) -> Self {
        self.id = Some(table_id.into());
        self
    }

    /// Set the id of the table.
    pub fn set_id(mut self, table_id: Option<String>) -> Self {
        self.id = table_id;
        self
    }

    /// Set the id of the share containing the table.
    pub fn share_id(mut self, share_id: impl Into<String>) -> Self {
        self.share_id = Some(share_id.into());
        self
    }

    /// Set the id of the share containing the table.
    pub fn set_share_id(mut self, share_id: Option<String>) -> Self {
        self.share_id = share_id;
        self
    }

    /// Set the name of the table.
    pub fn name(mut self, table_name: impl Into<String>) -> Self {
        self.name = Some(table_name.into());
        self
    }

    /// Set the name of the share containing the table.
    pub fn share_name(mut self, share_name: impl Into<String>) -> Self {
        self.share_name = Some(share_name.into());
        self
    }

    /// Set the name of the schema containing the table.
    pub fn schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = Some(schema_name.into());
        self
    }

    /// Set the storage location of the table.
    pub fn storage_path(mut self, path: impl Into<String>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// Set the data format of the table. Defaults to `delta`.
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Share the table as a view. Defaults to false.
    pub fn share_as_view(mut self, share_as_view: bool) -> Self {
        self.share_as_view = Some(share_as_view);
        self
    }

    /// Build the table.
    pub fn build(self) -> Result<Table, CatalogError> {
        let Some(name) = self.name else {
            return Err(CatalogError::internal(
                "the required attribute `name` was not set",
            ));
        };
        let Some(share_name) = self.share_name else {
            return Err(CatalogError::internal(
                "the required attribute `share_name` was not set",
            ));
        };
        let Some(schema_name) = self.schema_name else {
            return Err(CatalogError::internal(
                "the required attribute `schema_name` was not set",
            ));
        };
        let Some(storage_path) = self.storage_path else {
            return Err(CatalogError::internal(
                "the required attribute `storage_path` was not set",
            ));
        };

        Ok(Table {
            id: self.id,
            name,
            share_id: self.share_id,
            share_name,
            schema_name,
            storage_location: storage_path,
            format: self.format.unwrap_or_else(|| String::from("delta")),
            share_as_view: self.share_as_view.unwrap_or(false),
        })
    }
}

/// Kind of error that occurred while accessing the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogErrorKind {
    /// The requested share, schema or table was not found.
    ResourceNotFound,
    /// The requested asset is not accessible to the recipient.
    ResourceForbidden,
    /// The pagination token is malformed.
    MalformedPagination,
    /// The backing store could not be reached.
    Unavailable,
    /// The catalog has an internal error.
    Internal,
}

/// Error that occurred during the listing and retrieval of shared assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogError {
    kind: CatalogErrorKind,
    message: String,
}

impl CatalogError {
    /// Create a new error with the specified kind and message.
    pub fn new(kind: CatalogErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Kind of the error.
    pub fn kind(&self) -> CatalogErrorKind {
        self.kind
    }

    /// Message of the error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The requested asset was not found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CatalogErrorKind::ResourceNotFound, message)
    }

    /// The requested asset is not accessible to the recipient.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(CatalogErrorKind::ResourceForbidden, message)
    }

    /// The pagination token is malformed.
    pub fn malformed_pagination(message: impl Into<String>) -> Self {
        Self::new(CatalogErrorKind::MalformedPagination, message)
    }

    /// The backing store could not be reached.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(CatalogErrorKind::Unavailable, message)
    }

    /// The catalog failed internally.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CatalogErrorKind::Internal, message)
    }
}

impl Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for CatalogError {}

#[derive(Debug, Serialize, Deserialize)]
struct PageCursor {
    v: u8,
    last: String,
}

/// Encode the sort key of the last emitted item into an opaque page token.
pub(crate) fn encode_page_token(last_key: &str) -> String {
    let cursor = PageCursor {
        v: 1,
        last: last_key.to_owned(),
    };
    let json = serde_json::to_vec(&cursor).expect("cursor serializes");
    general_purpose::URL_SAFE.encode(json)
}

/// Decode an opaque page token back into the sort key it wraps.
pub(crate) fn decode_page_token(token: &str) -> Result<String, CatalogError> {
    let bytes = general_purpose::URL_SAFE
        .decode(token)
        .map_err(|_| CatalogError::malformed_pagination("the provided `pageToken` is invalid"))?;
    let cursor: PageCursor = serde_json::from_slice(&bytes)
        .map_err(|_| CatalogError::malformed_pagination("the provided `pageToken` is invalid"))?;
    if cursor.v != 1 {
        return Err(CatalogError::malformed_pagination(
            "the provided `pageToken` is of an unknown version",
        ));
    }
    Ok(cursor.last)
}

/// Order items by a sort key and cut out the page selected by the
/// pagination parameters. Used by in-memory catalog implementations.
pub(crate) fn paginate_by_key<T>(
    mut items: Vec<T>,
    pagination: &Pagination,
    default_page_size: u32,
    key: impl Fn(&T) -> String,
) -> Result<Page<T>, CatalogError> {
    items.sort_by_key(|item| key(item));

    if let Some(token) = pagination.page_token() {
        let last = decode_page_token(token)?;
        items.retain(|item| key(item) > last);
    }

    let max_results = pagination.max_results().unwrap_or(default_page_size) as usize;
    if max_results == 0 {
        return Err(CatalogError::malformed_pagination(
            "the `maxResults` parameter must be positive",
        ));
    }

    if items.len() > max_results {
        items.truncate(max_results);
        let next = items
            .last()
            .map(|item| encode_page_token(&key(item)))
            .expect("page is non-empty");
        Ok(Page::new(items, Some(next)))
    } else {
        Ok(Page::new(items, None))
    }
}
