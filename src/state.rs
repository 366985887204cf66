//! Delta Sharing server state.

use std::sync::Arc;

use tracing::debug;

use crate::{
    auth::RecipientId,
    catalog::{Catalog, Page, Pagination, Schema, Share, Table},
    config::ServerConfig,
    error::ServerError,
    extract::{Capabilities, QueryRequest, ResponseFormat},
    reader::{
        cache::SnapshotCache, TableData, TableReader, TableVersionNumber, Version, VersionRange,
    },
    response::{delta::DeltaResponse, parquet::ParquetResponse, TableActionsResponse},
    signer::{registry::SignerRegistry, UrlSigner},
    skipping,
};

/// State of the sharing server.
///
/// Wires the catalog, the table reader with its snapshot cache, the url
/// signers and the server configuration into the operations behind the
/// protocol endpoints.
pub struct SharingServerState {
    catalog: Arc<dyn Catalog>,
    reader: Arc<dyn TableReader>,
    signers: SignerRegistry,
    cache: SnapshotCache,
    config: ServerConfig,
}

impl SharingServerState {
    /// Create a new sharing server state.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        reader: Arc<dyn TableReader>,
        signers: SignerRegistry,
        config: ServerConfig,
    ) -> Self {
        let cache = SnapshotCache::new(
            config.snapshot_cache_capacity,
            config.snapshot_cache_ttl(),
        );
        Self {
            catalog,
            reader,
            signers,
            cache,
            config,
        }
    }

    /// Get the catalog from the state.
    pub fn catalog(&self) -> Arc<dyn Catalog> {
        self.catalog.clone()
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Add a url signer for a storage scheme.
    pub fn add_url_signer(&mut self, scheme: impl Into<String>, signer: Arc<dyn UrlSigner>) {
        self.signers.register(&scheme.into(), signer);
    }

    /// Drop all cached snapshots of a table. Wired to catalog mutations
    /// by the embedding application.
    pub fn invalidate_table(&self, table_id: &str) {
        self.cache.invalidate_table(table_id);
    }

    /// Clamp the requested page size to the configured bounds.
    fn effective_pagination(&self, pagination: &Pagination) -> Result<Pagination, ServerError> {
        let max_results = match pagination.max_results() {
            Some(0) => {
                return Err(ServerError::invalid_parameter(
                    "the `maxResults` parameter must be positive",
                ))
            }
            Some(n) => n.min(self.config.max_page_size),
            None => self.config.default_page_size,
        };
        Ok(Pagination::new(
            Some(max_results),
            pagination.page_token().map(ToOwned::to_owned),
        ))
    }

    /// Get a list of shares in the catalog.
    pub async fn list_shares(
        &self,
        recipient_id: &RecipientId,
        pagination: &Pagination,
    ) -> Result<Page<Share>, ServerError> {
        let pagination = self.effective_pagination(pagination)?;
        Ok(self.catalog.list_shares(recipient_id, &pagination).await?)
    }

    /// Get a share from the catalog.
    pub async fn get_share(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
    ) -> Result<Share, ServerError> {
        Ok(self.catalog.get_share(recipient_id, share_name).await?)
    }

    /// Get a list of schemas in a share.
    pub async fn list_schemas(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        pagination: &Pagination,
    ) -> Result<Page<Schema>, ServerError> {
        let pagination = self.effective_pagination(pagination)?;
        Ok(self
            .catalog
            .list_schemas(recipient_id, share_name, &pagination)
            .await?)
    }

    /// Get a list of tables in a share, across all of its schemas.
    pub async fn list_tables_in_share(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        pagination: &Pagination,
    ) -> Result<Page<Table>, ServerError> {
        let pagination = self.effective_pagination(pagination)?;
        Ok(self
            .catalog
            .list_tables_in_share(recipient_id, share_name, &pagination)
            .await?)
    }

    /// Get a list of tables in a schema.
    pub async fn list_tables_in_schema(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        schema_name: &str,
        pagination: &Pagination,
    ) -> Result<Page<Table>, ServerError> {
        let pagination = self.effective_pagination(pagination)?;
        Ok(self
            .catalog
            .list_tables_in_schema(recipient_id, share_name, schema_name, &pagination)
            .await?)
    }

    /// Get the version of a table.
    pub async fn get_table_version_number(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        schema_name: &str,
        table_name: &str,
        version: Version,
    ) -> Result<TableVersionNumber, ServerError> {
        let table = self
            .catalog
            .get_table(recipient_id, share_name, schema_name, table_name)
            .await?;

        Ok(self
            .reader
            .get_table_version_number(table.storage_path(), version)
            .await?)
    }

    /// Get the metadata of a table.
    pub async fn get_table_metadata(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        schema_name: &str,
        table_name: &str,
        capabilities: &Capabilities,
    ) -> Result<TableActionsResponse, ServerError> {
        let table = self
            .catalog
            .get_table(recipient_id, share_name, schema_name, table_name)
            .await?;

        debug!(table = %table.name(), "reading table snapshot");
        let snapshot = self.load_snapshot(&table, Version::Latest).await?;

        let response = match self.select_format(capabilities, &snapshot) {
            ResponseFormat::Delta => {
                TableActionsResponse::new_delta(DeltaResponse::metadata_only(&snapshot))
            }
            ResponseFormat::Parquet => {
                TableActionsResponse::new_parquet(ParquetResponse::metadata_only(&snapshot))
            }
        };
        Ok(self.finish(response, capabilities))
    }

    /// Get the data files of a table version.
    pub async fn get_table_data(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        schema_name: &str,
        table_name: &str,
        query: QueryRequest,
        capabilities: &Capabilities,
    ) -> Result<TableActionsResponse, ServerError> {
        // a version range turns the query into a change data feed request
        if query.starting_version.is_some() {
            let range = VersionRange::Version {
                start: query.starting_version.unwrap_or_default(),
                end: query.ending_version,
            };
            return self
                .get_table_changes(
                    recipient_id,
                    share_name,
                    schema_name,
                    table_name,
                    range,
                    capabilities,
                )
                .await;
        }

        let table = self
            .catalog
            .get_table(recipient_id, share_name, schema_name, table_name)
            .await?;

        let version = match (&query.version, &query.timestamp) {
            (Some(v), _) => Version::Number(*v),
            (None, Some(ts)) => {
                let ts = ts.parse::<chrono::DateTime<chrono::Utc>>().map_err(|_| {
                    ServerError::invalid_parameter("the `timestamp` parameter is invalid")
                })?;
                Version::Timestamp(ts)
            }
            (None, None) => Version::Latest,
        };

        debug!(table = %table.name(), "reading table snapshot");
        let snapshot = self.load_snapshot(&table, version).await?;

        let predicates = skipping::parse_hints(&query.predicate_hints);
        let mut files = skipping::prune(
            snapshot.files().to_vec(),
            &predicates,
            &snapshot.metadata().partition_columns,
        );
        if let Some(limit) = query.limit_hint {
            files = apply_limit_hint(files, limit);
        }
        let snapshot = (*snapshot).clone().with_files(files);

        let response = match self.select_format(capabilities, &snapshot) {
            ResponseFormat::Delta => {
                TableActionsResponse::new_delta(DeltaResponse::from_snapshot(&snapshot))
            }
            ResponseFormat::Parquet => {
                TableActionsResponse::new_parquet(ParquetResponse::from_snapshot(&snapshot))
            }
        };

        // urls are signed lazily, file by file, while the response streams
        let signer = self.signer_for(table.storage_path());
        let response = response.with_signer(table.storage_path(), signer);

        Ok(self.finish(response, capabilities))
    }

    /// Get the change data feed of a table.
    pub async fn get_table_changes(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        schema_name: &str,
        table_name: &str,
        range: VersionRange,
        capabilities: &Capabilities,
    ) -> Result<TableActionsResponse, ServerError> {
        let table = self
            .catalog
            .get_table(recipient_id, share_name, schema_name, table_name)
            .await?;

        debug!(table = %table.name(), "reading table changes");
        let changes = self
            .reader
            .get_table_changes(table.storage_path(), range)
            .await?;

        // the change data feed is always rendered in the parquet format
        let response =
            TableActionsResponse::new_parquet(ParquetResponse::from_changes(&changes));

        // urls are signed lazily, file by file, while the response streams
        let signer = self.signer_for(table.storage_path());
        let response = response.with_signer(table.storage_path(), signer);

        Ok(self.finish(response, capabilities))
    }

    async fn load_snapshot(
        &self,
        table: &Table,
        version: Version,
    ) -> Result<Arc<TableData>, ServerError> {
        let resolved = match version {
            Version::Number(v) => v,
            other => {
                self.reader
                    .get_table_version_number(table.storage_path(), other)
                    .await?
                    .version()
            }
        };

        let reader = self.reader.clone();
        let storage_path = table.storage_path().to_owned();
        let snapshot = self
            .cache
            .get_or_load(table.cache_key(), resolved, async move {
                reader
                    .get_table_data(&storage_path, Version::Number(resolved))
                    .await
            })
            .await?;
        Ok(snapshot)
    }

    /// Pick the response format. When the client accepts both families,
    /// delta is chosen only for tables a parquet-format client could not
    /// read faithfully.
    fn select_format(
        &self,
        capabilities: &Capabilities,
        snapshot: &TableData,
    ) -> ResponseFormat {
        if !capabilities.accepts_delta_format() {
            return ResponseFormat::Parquet;
        }
        if !capabilities.accepts_parquet_format() {
            return ResponseFormat::Delta;
        }
        if table_requires_delta(snapshot) {
            ResponseFormat::Delta
        } else {
            ResponseFormat::Parquet
        }
    }

    fn finish(
        &self,
        response: TableActionsResponse,
        capabilities: &Capabilities,
    ) -> TableActionsResponse {
        if capabilities.include_end_stream_action() {
            response.with_end_stream_action()
        } else {
            response
        }
    }

    fn signer_for(&self, storage_path: &str) -> Arc<dyn UrlSigner> {
        let scheme = match url::Url::parse(storage_path) {
            Ok(url) => url.scheme().to_owned(),
            // plain paths are filesystem storage
            Err(_) => String::from("file"),
        };
        self.signers.get_or_noop(&scheme)
    }
}

/// Whether a parquet-format rendering would lose information.
fn table_requires_delta(snapshot: &TableData) -> bool {
    if snapshot.protocol().min_reader_version >= 3 {
        return true;
    }
    if snapshot.files().iter().any(|f| f.has_deletion_vector()) {
        return true;
    }
    let metadata = snapshot.metadata();
    if metadata.property("delta.enableDeletionVectors") == Some("true") {
        return true;
    }
    matches!(
        metadata.property("delta.columnMapping.mode"),
        Some(mode) if mode != "none"
    )
}

/// Stop emitting files once the cumulative record count reaches the
/// advisory limit. Files without statistics never contribute.
fn apply_limit_hint(
    files: Vec<crate::reader::TableFile>,
    limit: i64,
) -> Vec<crate::reader::TableFile> {
    let mut out = vec![];
    let mut records = 0i64;
    for file in files {
        let file_records = file.num_records().unwrap_or(0);
        out.push(file);
        records += file_records;
        if records >= limit {
            break;
        }
    }
    out
}
