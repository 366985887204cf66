//! Catalog implementation based on a configuration file.
//!
//! The share file is a yaml document listing shares, their schemas and
//! tables. This is the catalog of choice for on-premise deployments where
//! the set of shared tables changes rarely and lives in version control.
//!
//! ```yaml
//! shares:
//! - name: "share1"
//!   schemas:
//!   - name: "schema1"
//!     tables:
//!     - name: "table1"
//!       location: "/data/delta/table1"
//!       id: "00000000-0000-0000-0000-000000000000"
//! ```

use self::model::ShareFile;

use super::{paginate_by_key, Catalog, CatalogError, Page, Pagination, Schema, Share, Table};
use crate::auth::RecipientId;

mod config;
mod model;

pub use config::FileCatalogConfig;

const DEFAULT_PAGE_SIZE: u32 = 500;

/// Catalog based on a yaml configuration file.
#[derive(Debug)]
pub struct FileCatalog {
    shares: ShareFile,
}

impl FileCatalog {
    /// Load the catalog from the configured share file.
    ///
    /// The whole file is validated up front; a share, schema or table
    /// that does not form a valid catalog entity rejects the load instead
    /// of failing requests later.
    pub fn new(config: FileCatalogConfig) -> Result<Self, CatalogError> {
        let handle = std::fs::OpenOptions::new()
            .read(true)
            .open(config.path())
            .map_err(|e| {
                CatalogError::internal(format!("share file could not be opened: {e}"))
            })?;
        let shares = serde_yaml::from_reader::<_, ShareFile>(handle)
            .map_err(|e| CatalogError::internal(format!("share file could not be parsed: {e}")))?;
        shares.validate()?;
        Ok(Self { shares })
    }

    fn file(&self) -> &ShareFile {
        &self.shares
    }
}

#[async_trait::async_trait]
impl Catalog for FileCatalog {
    async fn list_shares(
        &self,
        recipient_id: &RecipientId,
        pagination: &Pagination,
    ) -> Result<Page<Share>, CatalogError> {
        let shares = self.file().list_shares(recipient_id)?;
        paginate_by_key(shares, pagination, DEFAULT_PAGE_SIZE, |share| {
            format!("{}\u{0}{}", share.name(), share.id().unwrap_or_default())
        })
    }

    async fn get_share(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
    ) -> Result<Share, CatalogError> {
        self.file()
            .list_shares(recipient_id)?
            .into_iter()
            .find(|share| share.name() == share_name)
            .ok_or_else(|| CatalogError::not_found(format!("share `{share_name}` not found")))
    }

    async fn list_schemas(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        pagination: &Pagination,
    ) -> Result<Page<Schema>, CatalogError> {
        if !self.file().share_exists(recipient_id, share_name) {
            return Err(CatalogError::not_found(format!(
                "share `{share_name}` not found"
            )));
        }
        let schemas = self.file().list_schemas(recipient_id, share_name)?;
        paginate_by_key(schemas, pagination, DEFAULT_PAGE_SIZE, |schema| {
            schema.name().to_owned()
        })
    }

    async fn list_tables_in_share(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        pagination: &Pagination,
    ) -> Result<Page<Table>, CatalogError> {
        if !self.file().share_exists(recipient_id, share_name) {
            return Err(CatalogError::not_found(format!(
                "share `{share_name}` not found"
            )));
        }
        let tables = self.file().list_tables_in_share(recipient_id, share_name)?;
        paginate_by_key(tables, pagination, DEFAULT_PAGE_SIZE, |table| {
            format!("{}\u{0}{}", table.schema_name(), table.name())
        })
    }

    async fn list_tables_in_schema(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        schema_name: &str,
        pagination: &Pagination,
    ) -> Result<Page<Table>, CatalogError> {
        if !self.file().share_exists(recipient_id, share_name) {
            return Err(CatalogError::not_found(format!(
                "share `{share_name}` not found"
            )));
        }
        if !self
            .file()
            .schema_exists(recipient_id, share_name, schema_name)
        {
            return Err(CatalogError::not_found(format!(
                "schema `{share_name}.{schema_name}` not found"
            )));
        }
        let tables = self
            .file()
            .list_tables_in_schema(recipient_id, share_name, schema_name)?;
        paginate_by_key(tables, pagination, DEFAULT_PAGE_SIZE, |table| {
            table.name().to_owned()
        })
    }

    async fn get_table(
        &self,
        recipient_id: &RecipientId,
        share_name: &str,
        schema_name: &str,
        table_name: &str,
    ) -> Result<Table, CatalogError> {
        self.file()
            .list_tables_in_schema(recipient_id, share_name, schema_name)?
            .into_iter()
            .find(|table| table.name() == table_name)
            .ok_or_else(|| {
                CatalogError::not_found(format!(
                    "table `{share_name}.{schema_name}.{table_name}` not found"
                ))
            })
    }
}
