//! The delta response format.
//!
//! File lines wrap the original delta actions so that clients with a
//! delta kernel can replay them; statistics stay in their raw json-string
//! form and the signed url travels in the wrapped add action's `path`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::reader::action::Protocol;
use crate::reader::TableData;
use crate::signer::{SignedUrl, UrlSigner};

use super::{file_id, ndjson_response, EndStreamAction, MetadataFields, SignableLine, Signing};

/// A table response rendered in the delta format.
///
/// File urls are signed while the response streams; attach the signer
/// with [`with_signer`](DeltaResponse::with_signer) before conversion.
#[derive(Debug, Clone)]
pub struct DeltaResponse {
    version: u64,
    protocol: Protocol,
    metadata: MetadataFields,
    // surviving file set measures, None on metadata-only responses
    size: Option<u64>,
    num_files: Option<u64>,
    files: Vec<FileLine>,
    include_end_stream_action: bool,
    signing: Option<Signing>,
}

impl DeltaResponse {
    /// Protocol and metadata lines only, for the metadata endpoint.
    pub fn metadata_only(data: &TableData) -> Self {
        Self {
            version: data.version(),
            protocol: data.protocol().clone(),
            metadata: MetadataFields::from(data.metadata()),
            size: None,
            num_files: None,
            files: vec![],
            include_end_stream_action: false,
            signing: None,
        }
    }

    /// Protocol, metadata and one wrapped add action per live data file.
    pub fn from_snapshot(data: &TableData) -> Self {
        let files = data.files().iter().map(FileLine::from_table_file).collect();
        Self {
            version: data.version(),
            protocol: data.protocol().clone(),
            metadata: MetadataFields::from(data.metadata()),
            size: Some(data.total_size()),
            num_files: Some(data.num_files()),
            files,
            include_end_stream_action: false,
            signing: None,
        }
    }

    /// The table version the response describes.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Attach the signer that signs each wrapped file url as its line is
    /// streamed.
    pub fn with_signer(mut self, table_root: &str, signer: Arc<dyn UrlSigner>) -> Self {
        self.signing = Some(Signing::new(table_root, signer));
        self
    }

    /// Append the end-stream action to the stream.
    pub fn with_end_stream_action(mut self) -> Self {
        self.include_end_stream_action = true;
        self
    }
}

impl IntoResponse for DeltaResponse {
    fn into_response(self) -> Response {
        let mut lines = Vec::with_capacity(self.files.len() + 2);
        lines.push(DeltaLine::Protocol(ProtocolLine {
            delta_protocol: self.protocol,
        }));
        lines.push(DeltaLine::Metadata(MetadataLine {
            size: self.size,
            num_files: self.num_files,
            delta_metadata: self.metadata,
        }));
        lines.extend(self.files.into_iter().map(DeltaLine::File));
        ndjson_response(
            self.version,
            self.include_end_stream_action,
            lines,
            self.signing,
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
enum DeltaLine {
    Protocol(ProtocolLine),
    #[serde(rename = "metaData")]
    Metadata(MetadataLine),
    File(FileLine),
    EndStreamAction(EndStreamAction),
}

impl SignableLine for DeltaLine {
    fn unsigned_path(&self) -> Option<String> {
        match self {
            // before signing, the wrapped path is still log-relative
            DeltaLine::File(file) => Some(file.delta_single_action.add.path.clone()),
            _ => None,
        }
    }

    fn apply_signature(&mut self, signed: &SignedUrl) {
        if let DeltaLine::File(file) = self {
            file.delta_single_action.add.path = signed.url().to_owned();
            file.expiration_timestamp = Some(signed.expiration_timestamp_millis());
        }
    }

    fn end_stream(action: EndStreamAction) -> Self {
        DeltaLine::EndStreamAction(action)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolLine {
    delta_protocol: Protocol,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetadataLine {
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_files: Option<u64>,
    delta_metadata: MetadataFields,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileLine {
    id: String,
    size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration_timestamp: Option<i64>,
    delta_single_action: DeltaSingleAction,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeltaSingleAction {
    add: WrappedAdd,
}

/// The add action as rendered inside `deltaSingleAction`; `path` carries
/// the signed url and `stats` stays the raw json string from the log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct WrappedAdd {
    path: String,
    partition_values: HashMap<String, Option<String>>,
    size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    modification_time: Option<i64>,
    data_change: bool,
}

impl FileLine {
    fn from_table_file(file: &crate::reader::TableFile) -> Self {
        let add = file.add();
        Self {
            id: file_id(&add.path),
            size: add.size,
            expiration_timestamp: None,
            delta_single_action: DeltaSingleAction {
                add: WrappedAdd {
                    path: add.path.clone(),
                    partition_values: add.partition_values.clone(),
                    size: add.size,
                    stats: add.stats.clone(),
                    modification_time: Some(add.modification_time),
                    data_change: false,
                },
            },
        }
    }
}
