//! Delta table fixtures written to a temporary directory.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

/// A Delta table on the local filesystem, with a real `_delta_log`.
pub struct DeltaTableFixture {
    dir: TempDir,
}

impl DeltaTableFixture {
    /// A table directory with an empty `_delta_log`.
    pub fn empty() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("_delta_log")).unwrap();
        Self { dir }
    }

    /// A table directory without any `_delta_log`.
    pub fn bare() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn location(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    /// Append a commit file holding the given NDJSON lines.
    pub fn write_commit(&self, version: u64, lines: &[String]) {
        let log_dir = self.dir.path().join("_delta_log");
        fs::create_dir_all(&log_dir).unwrap();
        fs::write(
            log_dir.join(format!("{version:020}.json")),
            lines.join("\n"),
        )
        .unwrap();
    }
}

pub fn protocol_line() -> String {
    r#"{"protocol":{"minReaderVersion":1,"minWriterVersion":2}}"#.to_owned()
}

pub fn commit_info_line(timestamp: i64) -> String {
    format!(r#"{{"commitInfo":{{"timestamp":{timestamp}}}}}"#)
}

pub fn metadata_line(id: &str, partition_columns: &[&str], configuration: &str) -> String {
    let partition_columns = partition_columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        r#"{{"metaData":{{"id":"{id}","format":{{"provider":"parquet","options":{{}}}},"schemaString":"{{\"type\":\"struct\",\"fields\":[]}}","partitionColumns":[{partition_columns}],"configuration":{configuration}}}}}"#
    )
}

pub fn add_line(path: &str, partition_values: &str, stats: Option<&str>) -> String {
    let stats = match stats {
        Some(stats) => format!(",\"stats\":\"{}\"", stats.replace('"', "\\\"")),
        None => String::new(),
    };
    format!(
        r#"{{"add":{{"path":"{path}","partitionValues":{partition_values},"size":573,"modificationTime":1619824428000,"dataChange":true{stats}}}}}"#
    )
}

pub fn remove_line(path: &str) -> String {
    format!(r#"{{"remove":{{"path":"{path}","dataChange":true}}}}"#)
}
