//! The parquet response format.
//!
//! File lines carry a plain url plus structured statistics; the protocol
//! line advertises reader version 1 regardless of the table protocol,
//! since everything a parquet-format client receives is plain parquet.

use std::collections::HashMap;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::reader::action::FileStats;
use crate::reader::{TableChanges, TableData};
use crate::signer::{SignedUrl, UrlSigner};

use super::{file_id, ndjson_response, EndStreamAction, MetadataFields, SignableLine, Signing};

/// A table response rendered in the parquet format.
///
/// File urls are signed while the response streams; attach the signer
/// with [`with_signer`](ParquetResponse::with_signer) before conversion.
#[derive(Debug, Clone)]
pub struct ParquetResponse {
    version: u64,
    metadata: MetadataFields,
    files: Vec<FileLine>,
    include_end_stream_action: bool,
    signing: Option<Signing>,
}

impl ParquetResponse {
    /// Protocol and metadata lines only, for the metadata endpoint.
    pub fn metadata_only(data: &TableData) -> Self {
        Self {
            version: data.version(),
            metadata: MetadataFields::from(data.metadata()),
            files: vec![],
            include_end_stream_action: false,
            signing: None,
        }
    }

    /// Protocol, metadata and one file line per live data file.
    pub fn from_snapshot(data: &TableData) -> Self {
        let files = data.files().iter().map(FileLine::from_table_file).collect();
        Self {
            version: data.version(),
            metadata: MetadataFields::from(data.metadata()),
            files,
            include_end_stream_action: false,
            signing: None,
        }
    }

    /// Protocol, metadata and one annotated file line per change.
    pub fn from_changes(changes: &TableChanges) -> Self {
        let files = changes.changes().iter().map(FileLine::from_change).collect();
        Self {
            version: changes.version(),
            metadata: MetadataFields::from(changes.metadata()),
            files,
            include_end_stream_action: false,
            signing: None,
        }
    }

    /// The table version the response describes.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Attach the signer that signs each file url as its line is
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

impl IntoResponse for ParquetResponse {
    fn into_response(self) -> Response {
        let mut lines = Vec::with_capacity(self.files.len() + 2);
        lines.push(ParquetLine::Protocol(ProtocolLine {
            min_reader_version: 1,
        }));
        lines.push(ParquetLine::Metadata(self.metadata));
        lines.extend(self.files.into_iter().map(ParquetLine::File));
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
enum ParquetLine {
    Protocol(ProtocolLine),
    #[serde(rename = "metaData")]
    Metadata(MetadataFields),
    File(FileLine),
    EndStreamAction(EndStreamAction),
}

impl SignableLine for ParquetLine {
    fn unsigned_path(&self) -> Option<String> {
        match self {
            // before signing, `url` still holds the log-relative path
            ParquetLine::File(file) => Some(file.url.clone()),
            _ => None,
        }
    }

    fn apply_signature(&mut self, signed: &SignedUrl) {
        if let ParquetLine::File(file) = self {
            file.url = signed.url().to_owned();
            file.expiration_timestamp = Some(signed.expiration_timestamp_millis());
        }
    }

    fn end_stream(action: EndStreamAction) -> Self {
        ParquetLine::EndStreamAction(action)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolLine {
    min_reader_version: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileLine {
    url: String,
    id: String,
    partition_values: HashMap<String, Option<String>>,
    size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<FileStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    change_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration_timestamp: Option<i64>,
}

impl FileLine {
    fn from_table_file(file: &crate::reader::TableFile) -> Self {
        Self {
            url: file.path().to_owned(),
            id: file_id(file.path()),
            partition_values: file.partition_values().clone(),
            size: file.size(),
            stats: file.stats().cloned(),
            version: None,
            timestamp: None,
            change_type: None,
            expiration_timestamp: None,
        }
    }

    fn from_change(change: &crate::reader::TableChange) -> Self {
        Self {
            url: change.path.clone(),
            id: file_id(&change.path),
            partition_values: change.partition_values.clone(),
            size: change.size,
            stats: change.stats.as_deref().and_then(FileStats::parse),
            version: Some(change.version),
            timestamp: Some(change.timestamp),
            change_type: Some(change.change_type.as_str()),
            expiration_timestamp: None,
        }
    }
}
