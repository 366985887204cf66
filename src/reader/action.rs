//! Actions of the Delta transaction log.
//!
//! Each line of a `_delta_log/NNNN.json` commit file holds a single json
//! object with one key naming the action. Only `protocol`, `metaData`,
//! `add`, `remove` and `cdc` affect a snapshot; `commitInfo` contributes
//! the commit timestamp and everything else is ignored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Protocol action; the reader/writer versions required for the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    /// Minimum reader version required to read the table.
    #[serde(default = "default_reader_version")]
    pub min_reader_version: u32,
    /// Minimum writer version required to write the table.
    #[serde(default = "default_writer_version")]
    pub min_writer_version: u32,
    /// Table features a reader must support, for reader version 3+.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_features: Option<Vec<String>>,
    /// Table features a writer must support, for writer version 7+.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer_features: Option<Vec<String>>,
}

fn default_reader_version() -> u32 {
    1
}

fn default_writer_version() -> u32 {
    2
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            min_reader_version: default_reader_version(),
            min_writer_version: default_writer_version(),
            reader_features: None,
            writer_features: None,
        }
    }
}

/// File format of the table data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    /// Name of the encoding, e.g. `parquet`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Options for the encoding.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

fn default_provider() -> String {
    String::from("parquet")
}

impl Default for Format {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            options: HashMap::new(),
        }
    }
}

/// Metadata action describing the table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Unique table identifier.
    pub id: String,
    /// User-facing name of the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// User-facing description of the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// File format of the table data.
    #[serde(default)]
    pub format: Format,
    /// Spark-style struct schema as a json string.
    #[serde(default)]
    pub schema_string: String,
    /// Columns the table is partitioned by.
    #[serde(default)]
    pub partition_columns: Vec<String>,
    /// Table properties.
    #[serde(default)]
    pub configuration: HashMap<String, String>,
    /// Creation time in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
}

impl Metadata {
    /// Look up a table property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).map(|v| v.as_str())
    }

    /// Whether the change data feed is recorded for this table.
    pub fn change_data_feed_enabled(&self) -> bool {
        self.property("delta.enableChangeDataFeed") == Some("true")
    }
}

/// Add action; a data file that is part of the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Add {
    /// Path of the file, relative to the table root.
    pub path: String,
    /// Values of the partition columns for every row in the file.
    #[serde(default)]
    pub partition_values: HashMap<String, Option<String>>,
    /// Size of the file in bytes.
    #[serde(default)]
    pub size: i64,
    /// Time the file was created, in epoch milliseconds.
    #[serde(default)]
    pub modification_time: i64,
    /// Whether the file changes the table data.
    #[serde(default = "default_true")]
    pub data_change: bool,
    /// Per-file statistics as a json string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
    /// User-defined tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, Option<String>>>,
    /// Deletion vector attached to the file, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_vector: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// Remove action; a tombstone for a previously added file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Remove {
    /// Path of the removed file, relative to the table root.
    pub path: String,
    /// Time of the removal in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<i64>,
    /// Whether the removal changes the table data.
    #[serde(default = "default_true")]
    pub data_change: bool,
    /// Values of the partition columns of the removed file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_values: Option<HashMap<String, Option<String>>>,
    /// Size of the removed file in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

/// Cdc action; a change-data file recorded by the change data feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cdc {
    /// Path of the change file, relative to the table root.
    pub path: String,
    /// Values of the partition columns for every row in the file.
    #[serde(default)]
    pub partition_values: HashMap<String, Option<String>>,
    /// Size of the file in bytes.
    #[serde(default)]
    pub size: i64,
}

/// Commit info action. Free-form; only the timestamp is used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    /// Commit time in epoch milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// A single action parsed from one line of a commit file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// Protocol action.
    Protocol(Protocol),
    /// Metadata action.
    #[serde(rename = "metaData")]
    Metadata(Metadata),
    /// Add file action.
    Add(Add),
    /// Remove file action.
    Remove(Remove),
    /// Change-data file action.
    Cdc(Cdc),
    /// Commit info action.
    CommitInfo(CommitInfo),
}

impl Action {
    /// Parse a single NDJSON line into an action.
    ///
    /// Lines holding an action this reader does not track (`txn`,
    /// `domainMetadata`, ...) yield `Ok(None)`; lines that are not valid
    /// json objects, or that hold a known action with an invalid shape,
    /// yield an error.
    pub fn from_line(line: &str) -> Result<Option<Action>, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        let known = value
            .as_object()
            .map(|obj| {
                obj.keys().any(|key| {
                    matches!(
                        key.as_str(),
                        "protocol" | "metaData" | "add" | "remove" | "cdc" | "commitInfo"
                    )
                })
            })
            .unwrap_or(true);
        if !known {
            return Ok(None);
        }
        serde_json::from_value(value).map(Some)
    }
}

/// Parsed per-file statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileStats {
    /// Number of rows in the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_records: Option<i64>,
    /// Minimum value per column.
    pub min_values: HashMap<String, StatValue>,
    /// Maximum value per column.
    pub max_values: HashMap<String, StatValue>,
    /// Null count per column.
    pub null_count: HashMap<String, NullCount>,
}

impl FileStats {
    /// Parse the `stats` string of an add action. Malformed statistics are
    /// reported as `None` after a warning; they never fail a snapshot.
    pub fn parse(raw: &str) -> Option<FileStats> {
        match serde_json::from_str(raw) {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::warn!(error = %e, "could not parse file statistics, skipping");
                None
            }
        }
    }
}

/// A scalar statistics value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
    /// Nested struct values.
    Struct(HashMap<String, StatValue>),
    /// Array values.
    Array(Vec<StatValue>),
}

impl StatValue {
    /// Numeric view of the value, if it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StatValue::Int(i) => Some(*i as f64),
            StatValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String view of the value, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StatValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Null counts are a number, or nested for struct columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NullCount {
    /// Null count of a leaf column.
    Count(i64),
    /// Null counts of a struct column's fields.
    Nested(HashMap<String, NullCount>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_protocol_line() {
        let action = Action::from_line(r#"{"protocol":{"minReaderVersion":1,"minWriterVersion":2}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            action,
            Action::Protocol(Protocol {
                min_reader_version: 1,
                min_writer_version: 2,
                reader_features: None,
                writer_features: None,
            })
        );
    }

    #[test]
    fn parse_metadata_line() {
        let line = r#"{"metaData":{"id":"f8d5c169-3d01-4ca3-ad9e-7dc3355aedb2","format":{"provider":"parquet","options":{}},"schemaString":"{\"type\":\"struct\",\"fields\":[]}","partitionColumns":["date"],"configuration":{"delta.enableChangeDataFeed":"true"},"createdTime":1619824428000}}"#;
        let action = Action::from_line(line).unwrap().unwrap();
        let Action::Metadata(metadata) = action else {
            panic!("expected metadata");
        };
        assert_eq!(metadata.id, "f8d5c169-3d01-4ca3-ad9e-7dc3355aedb2");
        assert_eq!(metadata.partition_columns, vec!["date"]);
        assert!(metadata.change_data_feed_enabled());
        assert_eq!(metadata.created_time, Some(1619824428000));
    }

    #[test]
    fn parse_add_line() {
        let line = r#"{"add":{"path":"date=2021-04-28/part-0001.snappy.parquet","partitionValues":{"date":"2021-04-28"},"size":573,"modificationTime":1619824428000,"dataChange":true,"stats":"{\"numRecords\":1,\"minValues\":{\"price\":10},\"maxValues\":{\"price\":20},\"nullCount\":{\"price\":0}}"}}"#;
        let action = Action::from_line(line).unwrap().unwrap();
        let Action::Add(add) = action else {
            panic!("expected add");
        };
        assert_eq!(add.path, "date=2021-04-28/part-0001.snappy.parquet");
        assert_eq!(
            add.partition_values.get("date"),
            Some(&Some("2021-04-28".to_owned()))
        );
        assert_eq!(add.size, 573);

        let stats = FileStats::parse(add.stats.as_deref().unwrap()).unwrap();
        assert_eq!(stats.num_records, Some(1));
        assert_eq!(stats.min_values.get("price"), Some(&StatValue::Int(10)));
        assert_eq!(stats.max_values.get("price"), Some(&StatValue::Int(20)));
        assert_eq!(stats.null_count.get("price"), Some(&NullCount::Count(0)));
    }

    #[test]
    fn parse_remove_line() {
        let line = r#"{"remove":{"path":"part-0001.snappy.parquet","deletionTimestamp":1619824430000,"dataChange":true}}"#;
        let action = Action::from_line(line).unwrap().unwrap();
        let Action::Remove(remove) = action else {
            panic!("expected remove");
        };
        assert_eq!(remove.path, "part-0001.snappy.parquet");
        assert_eq!(remove.deletion_timestamp, Some(1619824430000));
    }

    #[test]
    fn untracked_actions_are_skipped() {
        let action =
            Action::from_line(r#"{"txn":{"appId":"app","version":1}}"#).unwrap();
        assert_eq!(action, None);
    }

    #[test]
    fn malformed_line_is_an_error() {
        assert!(Action::from_line("not json at all").is_err());
        assert!(Action::from_line(r#"{"add":{"size":"not-a-number"}}"#).is_err());
    }

    #[test]
    fn malformed_stats_parse_to_none() {
        assert_eq!(FileStats::parse("{invalid"), None);
        let stats = FileStats::parse(r#"{"numRecords":42}"#).unwrap();
        assert_eq!(stats.num_records, Some(42));
        assert!(stats.min_values.is_empty());
    }

    #[test]
    fn nested_null_counts() {
        let stats = FileStats::parse(
            r#"{"numRecords":2,"nullCount":{"user":{"name":0,"email":1}}}"#,
        )
        .unwrap();
        let NullCount::Nested(nested) = stats.null_count.get("user").unwrap() else {
            panic!("expected nested null count");
        };
        assert_eq!(nested.get("email"), Some(&NullCount::Count(1)));
    }
}
