//! Types and traits for reading shared tables from storage.
//!
//! A [`TableReader`] turns the transaction log of a table into versioned,
//! immutable snapshot values. The [`delta`] module holds the reader for
//! the Delta Lake log format; [`cache`] memoizes the snapshots it
//! produces.

use std::{error::Error, fmt::Display};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod action;
pub mod cache;
pub mod delta;

use action::{Add, FileStats, Metadata, Protocol};

/// Trait for reading a versioned table format from storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TableReader: Send + Sync {
    /// Resolve a version request to a concrete table version number.
    async fn get_table_version_number(
        &self,
        storage_path: &str,
        version: Version,
    ) -> Result<TableVersionNumber, TableReaderError>;

    /// Retrieve the table snapshot for a specific table version.
    ///
    /// The snapshot holds the table protocol and metadata plus the full
    /// set of live data files at that version; pruning and url signing are
    /// applied downstream.
    async fn get_table_data(
        &self,
        storage_path: &str,
        version: Version,
    ) -> Result<TableData, TableReaderError>;

    /// Retrieve the change data feed for a range of table versions.
    async fn get_table_changes(
        &self,
        storage_path: &str,
        range: VersionRange,
    ) -> Result<TableChanges, TableReaderError>;
}

/// Requested table version.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Version {
    /// Latest table version.
    Latest,
    /// Table version number.
    Number(u64),
    /// Earliest table version committed at or after the specified
    /// timestamp.
    Timestamp(DateTime<Utc>),
}

/// Requested range of table versions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VersionRange {
    /// Range represented by version numbers; an absent end means the
    /// latest version.
    Version {
        /// First version included in the range.
        start: u64,
        /// Last version included in the range.
        end: Option<u64>,
    },
    /// Range represented by commit timestamps.
    Timestamp {
        /// First commit at or after this timestamp is included.
        start: DateTime<Utc>,
        /// Commits after this timestamp are excluded; absent means the
        /// latest version.
        end: Option<DateTime<Utc>>,
    },
}

/// Table version number.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct TableVersionNumber(u64);

impl TableVersionNumber {
    /// Create a new table version number.
    pub fn new(version: u64) -> Self {
        Self(version)
    }

    /// Get the table version number.
    pub fn version(&self) -> u64 {
        self.0
    }
}

/// A data file that is part of a table snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableFile {
    add: Add,
    stats: Option<FileStats>,
}

impl TableFile {
    /// Wrap an add action, parsing its statistics string.
    pub fn new(add: Add) -> Self {
        let stats = add.stats.as_deref().and_then(FileStats::parse);
        Self { add, stats }
    }

    /// Path of the file relative to the table root.
    pub fn path(&self) -> &str {
        &self.add.path
    }

    /// Partition values of the file.
    pub fn partition_values(&self) -> &std::collections::HashMap<String, Option<String>> {
        &self.add.partition_values
    }

    /// Size of the file in bytes.
    pub fn size(&self) -> i64 {
        self.add.size
    }

    /// Modification time of the file in epoch milliseconds.
    pub fn modification_time(&self) -> i64 {
        self.add.modification_time
    }

    /// Parsed statistics of the file, when present and well-formed.
    pub fn stats(&self) -> Option<&FileStats> {
        self.stats.as_ref()
    }

    /// The raw statistics string from the log.
    pub fn raw_stats(&self) -> Option<&str> {
        self.add.stats.as_deref()
    }

    /// Number of rows in the file, when statistics carry it.
    pub fn num_records(&self) -> Option<i64> {
        self.stats.as_ref().and_then(|s| s.num_records)
    }

    /// Whether the file carries a deletion vector.
    pub fn has_deletion_vector(&self) -> bool {
        self.add.deletion_vector.is_some()
    }

    /// The underlying add action.
    pub fn add(&self) -> &Add {
        &self.add
    }
}

/// A consistent snapshot of a table at one version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableData {
    version: u64,
    protocol: Protocol,
    metadata: Metadata,
    files: Vec<TableFile>,
}

impl TableData {
    /// Create a new table snapshot.
    pub fn new(version: u64, protocol: Protocol, metadata: Metadata, files: Vec<TableFile>) -> Self {
        Self {
            version,
            protocol,
            metadata,
            files,
        }
    }

    /// An empty snapshot for a table without a transaction log yet.
    pub fn empty() -> Self {
        let metadata = Metadata {
            schema_string: String::from("{}"),
            ..Default::default()
        };
        Self::new(0, Protocol::default(), metadata, vec![])
    }

    /// The table version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The table protocol.
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// The table metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The live data files at this version.
    pub fn files(&self) -> &[TableFile] {
        &self.files
    }

    /// Replace the file set, keeping version, protocol and metadata.
    pub fn with_files(self, files: Vec<TableFile>) -> Self {
        Self { files, ..self }
    }

    /// Total size in bytes of the live data files.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size().max(0) as u64).sum()
    }

    /// Number of live data files.
    pub fn num_files(&self) -> u64 {
        self.files.len() as u64
    }
}

/// Kind of change recorded in the change data feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Rows were inserted.
    Insert,
    /// Rows were removed.
    Remove,
    /// Pre-image of updated rows.
    UpdatePreimage,
    /// Post-image of updated rows.
    UpdatePostimage,
}

impl ChangeType {
    /// Wire name of the change type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Insert => "insert",
            ChangeType::Remove => "remove",
            ChangeType::UpdatePreimage => "update_preimage",
            ChangeType::UpdatePostimage => "update_postimage",
        }
    }
}

/// One changed file within the change data feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableChange {
    /// Path of the file relative to the table root.
    pub path: String,
    /// Partition values of the file.
    pub partition_values: std::collections::HashMap<String, Option<String>>,
    /// Size of the file in bytes.
    pub size: i64,
    /// Raw statistics string, when the log carries one.
    pub stats: Option<String>,
    /// Version of the commit the change belongs to.
    pub version: u64,
    /// Timestamp of the commit in epoch milliseconds.
    pub timestamp: i64,
    /// Kind of the change.
    pub change_type: ChangeType,
}

/// The change data feed of a table over a range of versions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableChanges {
    version: u64,
    protocol: Protocol,
    metadata: Metadata,
    changes: Vec<TableChange>,
}

impl TableChanges {
    /// Create a new change data feed value.
    pub fn new(
        version: u64,
        protocol: Protocol,
        metadata: Metadata,
        changes: Vec<TableChange>,
    ) -> Self {
        Self {
            version,
            protocol,
            metadata,
            changes,
        }
    }

    /// Last version included in the feed.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The table protocol at the end of the range.
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// The table metadata at the end of the range.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The changed files, ordered by version.
    pub fn changes(&self) -> &[TableChange] {
        &self.changes
    }
}

/// Kind of error that occurred while reading a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableReaderErrorKind {
    /// The requested table version does not exist.
    VersionNotFound,
    /// The transaction log could not be parsed at all.
    CorruptLog,
    /// The transaction log misses a protocol or metadata action.
    IncompleteLog,
    /// The change data feed is not recorded for the table.
    ChangeDataFeedDisabled,
    /// The requested version range is invalid.
    InvalidVersionRange,
    /// The storage holding the log could not be reached.
    Unavailable,
    /// The reader failed internally.
    Internal,
}

/// Error that occurred during the reading of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableReaderError {
    kind: TableReaderErrorKind,
    message: String,
}

impl TableReaderError {
    /// Create a new error with the specified kind and message.
    pub fn new(kind: TableReaderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Kind of the error.
    pub fn kind(&self) -> TableReaderErrorKind {
        self.kind
    }

    /// Message of the error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The requested table version does not exist.
    pub fn version_not_found(message: impl Into<String>) -> Self {
        Self::new(TableReaderErrorKind::VersionNotFound, message)
    }

    /// The transaction log could not be parsed at all.
    pub fn corrupt_log(message: impl Into<String>) -> Self {
        Self::new(TableReaderErrorKind::CorruptLog, message)
    }

    /// The transaction log misses a protocol or metadata action.
    pub fn incomplete_log(message: impl Into<String>) -> Self {
        Self::new(TableReaderErrorKind::IncompleteLog, message)
    }

    /// The change data feed is not recorded for the table.
    pub fn change_data_feed_disabled() -> Self {
        Self::new(
            TableReaderErrorKind::ChangeDataFeedDisabled,
            "Change data feed is not enabled",
        )
    }

    /// The requested version range is invalid.
    pub fn invalid_version_range(message: impl Into<String>) -> Self {
        Self::new(TableReaderErrorKind::InvalidVersionRange, message)
    }

    /// The storage holding the log could not be reached.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(TableReaderErrorKind::Unavailable, message)
    }

    /// The reader failed internally.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(TableReaderErrorKind::Internal, message)
    }
}

impl Display for TableReaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for TableReaderError {}
