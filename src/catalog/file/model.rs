use serde::{Deserialize, Serialize};

use crate::auth::RecipientId;
use crate::catalog::{CatalogError, Schema, Share, Table};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ShareFile {
    shares: Vec<ShareConfig>,
}

impl ShareFile {
    /// Check that every configured share, schema and table builds into a
    /// valid catalog entity, so that a bad share file is rejected at load
    /// time instead of failing individual requests later.
    pub fn validate(&self) -> Result<(), CatalogError> {
        for share_cfg in &self.shares {
            share_cfg.to_share()?;
            for schema_cfg in share_cfg.schemas() {
                schema_cfg.to_schema(&share_cfg.name)?;
                for table_cfg in schema_cfg.tables() {
                    table_cfg.to_table(share_cfg, &schema_cfg.name)?;
                }
            }
        }
        Ok(())
    }

    fn visible_shares<'a>(
        &'a self,
        recipient: &RecipientId,
    ) -> impl Iterator<Item = &'a ShareConfig> + 'a {
        let recipient = recipient.to_string();
        self.shares
            .iter()
            .filter(|cfg| cfg.active.unwrap_or(true))
            .filter(move |cfg| match &cfg.recipients {
                Some(r) => r.iter().any(|r| r == &recipient),
                None => true,
            })
    }

    pub fn list_shares(&self, recipient: &RecipientId) -> Result<Vec<Share>, CatalogError> {
        self.visible_shares(recipient)
            .map(|cfg| cfg.to_share())
            .collect()
    }

    pub fn list_schemas(
        &self,
        recipient: &RecipientId,
        share_name: &str,
    ) -> Result<Vec<Schema>, CatalogError> {
        self.visible_shares(recipient)
            .filter(|share_cfg| share_cfg.name == share_name)
            .flat_map(|share_cfg| share_cfg.schemas())
            .map(|schema_cfg| schema_cfg.to_schema(share_name))
            .collect()
    }

    pub fn list_tables_in_share(
        &self,
        recipient: &RecipientId,
        share_name: &str,
    ) -> Result<Vec<Table>, CatalogError> {
        self.visible_shares(recipient)
            .filter(|share_cfg| share_cfg.name == share_name)
            .flat_map(|share_cfg| {
                share_cfg.schemas().iter().flat_map(move |schema_cfg| {
                    schema_cfg
                        .tables()
                        .iter()
                        .map(move |table_cfg| table_cfg.to_table(share_cfg, &schema_cfg.name))
                })
            })
            .collect()
    }

    pub fn list_tables_in_schema(
        &self,
        recipient: &RecipientId,
        share_name: &str,
        schema_name: &str,
    ) -> Result<Vec<Table>, CatalogError> {
        self.visible_shares(recipient)
            .filter(|share_cfg| share_cfg.name == share_name)
            .flat_map(|share_cfg| {
                share_cfg
                    .schemas()
                    .iter()
                    .filter(|schema_cfg| schema_cfg.name == schema_name)
                    .flat_map(move |schema_cfg| {
                        schema_cfg
                            .tables()
                            .iter()
                            .map(move |table_cfg| table_cfg.to_table(share_cfg, &schema_cfg.name))
                    })
            })
            .collect()
    }

    pub fn share_exists(&self, recipient: &RecipientId, share_name: &str) -> bool {
        self.visible_shares(recipient)
            .any(|cfg| cfg.name == share_name)
    }

    pub fn schema_exists(
        &self,
        recipient: &RecipientId,
        share_name: &str,
        schema_name: &str,
    ) -> bool {
        self.visible_shares(recipient)
            .filter(|cfg| cfg.name == share_name)
            .flat_map(|cfg| cfg.schemas())
            .any(|schema_cfg| schema_cfg.name == schema_name)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ShareConfig {
    name: String,
    id: Option<String>,
    description: Option<String>,
    active: Option<bool>,
    recipients: Option<Vec<String>>,
    schemas: Vec<SchemaConfig>,
}

impl ShareConfig {
    fn to_share(&self) -> Result<Share, CatalogError> {
        Share::builder()
            .name(&self.name)
            .set_id(self.id.clone())
            .active(self.active.unwrap_or(true))
            .build()
    }

    fn schemas(&self) -> &[SchemaConfig] {
        &self.schemas
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SchemaConfig {
    name: String,
    tables: Vec<TableConfig>,
}

impl SchemaConfig {
    fn tables(&self) -> &[TableConfig] {
        &self.tables
    }

    fn to_schema(&self, share_name: &str) -> Result<Schema, CatalogError> {
        Schema::builder()
            .name(&self.name)
            .share_name(share_name)
            .build()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableConfig {
    name: String,
    location: String,
    id: Option<String>,
    format: Option<String>,
    share_as_view: Option<bool>,
}

impl TableConfig {
    fn to_table(&self, share: &ShareConfig, schema_name: &str) -> Result<Table, CatalogError> {
        let mut builder = Table::builder()
            .name(&self.name)
            .storage_path(&self.location)
            .set_id(self.id.clone())
            .set_share_id(share.id.clone())
            .schema_name(schema_name)
            .share_name(&share.name)
            .share_as_view(self.share_as_view.unwrap_or(false));
        if let Some(format) = &self.format {
            builder = builder.format(format);
        }
        builder.build()
    }
}
