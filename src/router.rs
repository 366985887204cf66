//! Router for the sharing server.

use std::sync::Arc;

use axum::debug_handler;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};

use crate::extract::{validate_shared_name, Capabilities, QueryRequest, TableChangeParams};
use crate::{
    auth::RecipientId,
    catalog::Pagination,
    error::Result,
    reader::Version,
    response::{
        GetShareResponse, ListSchemasResponse, ListSharesResponse, ListTablesResponse,
        TableActionsResponse, TableVersionResponse,
    },
    state::SharingServerState,
};

/// Builds the router for the sharing server.
///
/// Every route expects a [`RecipientId`] request extension, so the
/// returned router must be wrapped in one of the authentication layers
/// from [`crate::auth`].
pub fn build_sharing_server_router(state: Arc<SharingServerState>) -> Router {
    Router::new()
        .route("/shares", get(list_shares))
        .route("/shares/:share", get(get_share))
        .route("/shares/:share/schemas", get(list_schemas))
        .route(
            "/shares/:share/schemas/:schema/tables",
            get(list_tables_in_schema),
        )
        .route("/shares/:share/all-tables", get(list_tables_in_share))
        .route(
            "/shares/:share/schemas/:schema/tables/:table/version",
            get(get_table_version),
        )
        .route(
            "/shares/:share/schemas/:schema/tables/:table/metadata",
            get(get_table_metadata),
        )
        .route(
            "/shares/:share/schemas/:schema/tables/:table/query",
            post(get_table_data),
        )
        .route(
            "/shares/:share/schemas/:schema/tables/:table/changes",
            get(get_table_changes),
        )
        .with_state(state)
}

#[debug_handler]
async fn list_shares(
    state: State<Arc<SharingServerState>>,
    recipient_id: Extension<RecipientId>,
    pagination: Pagination,
) -> Result<ListSharesResponse> {
    let share_page = state.list_shares(&recipient_id, &pagination).await?;
    Ok(ListSharesResponse::from(share_page))
}

#[debug_handler]
async fn get_share(
    state: State<Arc<SharingServerState>>,
    recipient_id: Extension<RecipientId>,
    share_name: Path<String>,
) -> Result<GetShareResponse> {
    validate_shared_name(&share_name)?;
    let share = state.get_share(&recipient_id, &share_name).await?;
    Ok(share.into())
}

#[debug_handler]
async fn list_schemas(
    state: State<Arc<SharingServerState>>,
    recipient_id: Extension<RecipientId>,
    share_name: Path<String>,
    pagination: Pagination,
) -> Result<ListSchemasResponse> {
    validate_shared_name(&share_name)?;
    let schema_page = state
        .list_schemas(&recipient_id, &share_name, &pagination)
        .await?;
    Ok(ListSchemasResponse::from(schema_page))
}

#[debug_handler]
async fn list_tables_in_share(
    state: State<Arc<SharingServerState>>,
    recipient_id: Extension<RecipientId>,
    share_name: Path<String>,
    pagination: Pagination,
) -> Result<ListTablesResponse> {
    validate_shared_name(&share_name)?;
    let table_page = state
        .list_tables_in_share(&recipient_id, &share_name, &pagination)
        .await?;
    Ok(ListTablesResponse::from(table_page))
}

#[debug_handler]
async fn list_tables_in_schema(
    state: State<Arc<SharingServerState>>,
    recipient_id: Extension<RecipientId>,
    Path((share_name, schema_name)): Path<(String, String)>,
    pagination: Pagination,
) -> Result<ListTablesResponse> {
    validate_shared_name(&share_name)?;
    validate_shared_name(&schema_name)?;
    let table_page = state
        .list_tables_in_schema(&recipient_id, &share_name, &schema_name, &pagination)
        .await?;
    Ok(ListTablesResponse::from(table_page))
}

#[debug_handler]
async fn get_table_version(
    state: State<Arc<SharingServerState>>,
    recipient_id: Extension<RecipientId>,
    Path((share_name, schema_name, table_name)): Path<(String, String, String)>,
    version: Version,
) -> Result<TableVersionResponse> {
    validate_shared_name(&share_name)?;
    validate_shared_name(&schema_name)?;
    validate_shared_name(&table_name)?;
    let table_version = state
        .get_table_version_number(&recipient_id, &share_name, &schema_name, &table_name, version)
        .await?;
    Ok(TableVersionResponse::from(table_version))
}

#[debug_handler]
async fn get_table_metadata(
    state: State<Arc<SharingServerState>>,
    recipient_id: Extension<RecipientId>,
    capabilities: Capabilities,
    Path((share_name, schema_name, table_name)): Path<(String, String, String)>,
) -> Result<TableActionsResponse> {
    validate_shared_name(&share_name)?;
    validate_shared_name(&schema_name)?;
    validate_shared_name(&table_name)?;
    state
        .get_table_metadata(
            &recipient_id,
            &share_name,
            &schema_name,
            &table_name,
            &capabilities,
        )
        .await
}

#[debug_handler]
async fn get_table_data(
    state: State<Arc<SharingServerState>>,
    recipient_id: Extension<RecipientId>,
    capabilities: Capabilities,
    Path((share_name, schema_name, table_name)): Path<(String, String, String)>,
    query: Option<Json<QueryRequest>>,
) -> Result<TableActionsResponse> {
    validate_shared_name(&share_name)?;
    validate_shared_name(&schema_name)?;
    validate_shared_name(&table_name)?;
    let query = query.map(|Json(q)| q).unwrap_or_default();
    state
        .get_table_data(
            &recipient_id,
            &share_name,
            &schema_name,
            &table_name,
            query,
            &capabilities,
        )
        .await
}

#[debug_handler]
async fn get_table_changes(
    state: State<Arc<SharingServerState>>,
    recipient_id: Extension<RecipientId>,
    capabilities: Capabilities,
    Path((share_name, schema_name, table_name)): Path<(String, String, String)>,
    params: TableChangeParams,
) -> Result<TableActionsResponse> {
    validate_shared_name(&share_name)?;
    validate_shared_name(&schema_name)?;
    validate_shared_name(&table_name)?;
    state
        .get_table_changes(
            &recipient_id,
            &share_name,
            &schema_name,
            &table_name,
            params.version_range(),
            &capabilities,
        )
        .await
}
