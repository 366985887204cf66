//! Table reader for the Delta Lake transaction log format.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::action::{Action, Add, Metadata, Protocol};
use super::{
    ChangeType, TableChange, TableChanges, TableData, TableFile, TableReader, TableReaderError,
    TableVersionNumber, Version, VersionRange,
};

const LOG_DIR: &str = "_delta_log";

/// TableReader implementation for the Delta Lake format.
///
/// Reads the `_delta_log` directory under the table root and replays the
/// commit files into a snapshot. Checkpoint files are not consulted; the
/// log is replayed from version 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaLogReader;

impl DeltaLogReader {
    /// Create a new instance of the Delta Lake log reader.
    pub fn new() -> Self {
        Self
    }

    async fn snapshot(
        &self,
        storage_path: &str,
        version: Version,
    ) -> Result<TableData, TableReaderError> {
        let dir = log_dir(storage_path)?;
        let versions = list_versions(&dir).await?;
        if versions.is_empty() {
            // version 0 is the canonical version of a table without commits
            return match version {
                Version::Number(v) if v > 0 => Err(TableReaderError::version_not_found(
                    format!("table version {v} does not exist"),
                )),
                _ => Ok(TableData::empty()),
            };
        }

        let target = match version {
            Version::Latest => *versions.last().expect("versions is non-empty"),
            Version::Number(v) => {
                if !versions.contains(&v) {
                    return Err(TableReaderError::version_not_found(format!(
                        "table version {v} does not exist"
                    )));
                }
                v
            }
            Version::Timestamp(ts) => resolve_version_at(&dir, &versions, ts).await?,
        };

        let mut replay = Replay::default();
        for &v in versions.iter().filter(|&&v| v <= target) {
            let commit = read_commit(&dir, v).await?;
            for action in commit.actions {
                replay.apply(action);
            }
        }

        replay.into_table_data(target)
    }
}

#[async_trait]
impl TableReader for DeltaLogReader {
    async fn get_table_version_number(
        &self,
        storage_path: &str,
        version: Version,
    ) -> Result<TableVersionNumber, TableReaderError> {
        let dir = log_dir(storage_path)?;
        let versions = list_versions(&dir).await?;

        match version {
            Version::Latest => Ok(TableVersionNumber::new(
                versions.last().copied().unwrap_or(0),
            )),
            Version::Number(v) => {
                if versions.contains(&v) {
                    Ok(TableVersionNumber::new(v))
                } else {
                    Err(TableReaderError::version_not_found(format!(
                        "table version {v} does not exist"
                    )))
                }
            }
            Version::Timestamp(ts) => {
                if versions.is_empty() {
                    return Err(TableReaderError::version_not_found(
                        "the table has no commits",
                    ));
                }
                resolve_version_at(&dir, &versions, ts)
                    .await
                    .map(TableVersionNumber::new)
            }
        }
    }

    async fn get_table_data(
        &self,
        storage_path: &str,
        version: Version,
    ) -> Result<TableData, TableReaderError> {
        self.snapshot(storage_path, version).await
    }

    async fn get_table_changes(
        &self,
        storage_path: &str,
        range: VersionRange,
    ) -> Result<TableChanges, TableReaderError> {
        let dir = log_dir(storage_path)?;
        let versions = list_versions(&dir).await?;
        let Some(&latest) = versions.last() else {
            return Err(TableReaderError::version_not_found(
                "the table has no commits",
            ));
        };

        let mut commits = Vec::with_capacity(versions.len());
        for &v in &versions {
            commits.push(read_commit(&dir, v).await?);
        }

        let (start, end) = resolve_range(&commits, latest, range)?;

        let mut replay = Replay::default();
        for commit in commits.iter().filter(|c| c.version <= end) {
            for action in commit.actions.iter().cloned() {
                replay.apply(action);
            }
        }
        let protocol = replay.protocol.ok_or_else(|| {
            TableReaderError::incomplete_log("no protocol action found in the transaction log")
        })?;
        let metadata = replay.metadata.ok_or_else(|| {
            TableReaderError::incomplete_log("no metadata action found in the transaction log")
        })?;
        if !metadata.change_data_feed_enabled() {
            return Err(TableReaderError::change_data_feed_disabled());
        }

        let mut changes = vec![];
        for commit in commits
            .iter()
            .filter(|c| c.version >= start && c.version <= end)
        {
            changes.extend(commit.changes());
        }

        Ok(TableChanges::new(end, protocol, metadata, changes))
    }
}

fn log_dir(storage_path: &str) -> Result<PathBuf, TableReaderError> {
    if let Some(path) = storage_path.strip_prefix("file://") {
        Ok(PathBuf::from(path).join(LOG_DIR))
    } else if storage_path.contains("://") {
        Err(TableReaderError::internal(format!(
            "unsupported storage scheme in `{storage_path}`"
        )))
    } else {
        Ok(PathBuf::from(storage_path).join(LOG_DIR))
    }
}

fn commit_file_name(version: u64) -> String {
    format!("{version:020}.json")
}

async fn list_versions(dir: &Path) -> Result<Vec<u64>, TableReaderError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => {
            return Err(TableReaderError::unavailable(format!(
                "could not list `{}`: {e}",
                dir.display()
            )))
        }
    };

    let mut versions = vec![];
    loop {
        let entry = entries.next_entry().await.map_err(|e| {
            TableReaderError::unavailable(format!("could not list `{}`: {e}", dir.display()))
        })?;
        let Some(entry) = entry else { break };
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".json") {
            if stem.len() == 20 && stem.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(v) = stem.parse::<u64>() {
                    versions.push(v);
                }
            }
        }
    }
    versions.sort_unstable();
    Ok(versions)
}

struct Commit {
    version: u64,
    timestamp: i64,
    actions: Vec<Action>,
}

impl Commit {
    /// Change-data-feed lines of this commit.
    ///
    /// A commit that recorded cdc files represents its changes through
    /// them and its add/remove actions are bookkeeping only; without cdc
    /// files, data-changing adds are inserts and removes are removals.
    fn changes(&self) -> Vec<TableChange> {
        let cdc_changes: Vec<TableChange> = self
            .actions
            .iter()
            .filter_map(|action| match action {
                Action::Cdc(cdc) => Some(TableChange {
                    path: cdc.path.clone(),
                    partition_values: cdc.partition_values.clone(),
                    size: cdc.size,
                    stats: None,
                    version: self.version,
                    timestamp: self.timestamp,
                    change_type: ChangeType::UpdatePostimage,
                }),
                _ => None,
            })
            .collect();
        if !cdc_changes.is_empty() {
            return cdc_changes;
        }

        self.actions
            .iter()
            .filter_map(|action| match action {
                Action::Add(add) if add.data_change => Some(TableChange {
                    path: add.path.clone(),
                    partition_values: add.partition_values.clone(),
                    size: add.size,
                    stats: add.stats.clone(),
                    version: self.version,
                    timestamp: self.timestamp,
                    change_type: ChangeType::Insert,
                }),
                Action::Remove(remove) if remove.data_change => Some(TableChange {
                    path: remove.path.clone(),
                    partition_values: remove.partition_values.clone().unwrap_or_default(),
                    size: remove.size.unwrap_or(0),
                    stats: None,
                    version: self.version,
                    timestamp: self.timestamp,
                    change_type: ChangeType::Remove,
                }),
                _ => None,
            })
            .collect()
    }
}

async fn read_commit(dir: &Path, version: u64) -> Result<Commit, TableReaderError> {
    let path = dir.join(commit_file_name(version));
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TableReaderError::version_not_found(format!(
                "table version {version} does not exist"
            )))
        }
        Err(e) => {
            return Err(TableReaderError::unavailable(format!(
                "could not read `{}`: {e}",
                path.display()
            )))
        }
    };

    let mut actions = vec![];
    let mut timestamp = None;
    let mut parsed = 0usize;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match Action::from_line(line) {
            Ok(Some(Action::CommitInfo(info))) => {
                parsed += 1;
                if timestamp.is_none() {
                    timestamp = info.timestamp;
                }
            }
            Ok(Some(action)) => {
                parsed += 1;
                actions.push(action);
            }
            Ok(None) => parsed += 1,
            Err(e) => {
                tracing::warn!(version, error = %e, "skipping malformed log line");
            }
        }
    }

    if parsed == 0 {
        return Err(TableReaderError::corrupt_log(format!(
            "log file for version {version} is unreadable"
        )));
    }

    let timestamp = match timestamp {
        Some(t) => t,
        None => file_modified_millis(&path).await,
    };

    Ok(Commit {
        version,
        timestamp,
        actions,
    })
}

async fn file_modified_millis(path: &Path) -> i64 {
    tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
        .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
        .unwrap_or(0)
}

async fn resolve_version_at(
    dir: &Path,
    versions: &[u64],
    ts: DateTime<Utc>,
) -> Result<u64, TableReaderError> {
    let wanted = ts.timestamp_millis();
    for &v in versions {
        let commit = read_commit(dir, v).await?;
        if commit.timestamp >= wanted {
            return Ok(v);
        }
    }
    Err(TableReaderError::version_not_found(
        "no table version exists at or after the requested timestamp",
    ))
}

fn resolve_range(
    commits: &[Commit],
    latest: u64,
    range: VersionRange,
) -> Result<(u64, u64), TableReaderError> {
    match range {
        VersionRange::Version { start, end } => {
            let end = end.unwrap_or(latest);
            if start > end {
                return Err(TableReaderError::invalid_version_range(
                    "the starting version cannot be greater than the ending version",
                ));
            }
            if end > latest {
                return Err(TableReaderError::version_not_found(format!(
                    "table version {end} does not exist"
                )));
            }
            Ok((start, end))
        }
        VersionRange::Timestamp { start, end } => {
            let start_ms = start.timestamp_millis();
            let start_v = commits
                .iter()
                .find(|c| c.timestamp >= start_ms)
                .map(|c| c.version)
                .ok_or_else(|| {
                    TableReaderError::version_not_found(
                        "no table version exists at or after the starting timestamp",
                    )
                })?;
            let end_v = match end {
                Some(end) => {
                    let end_ms = end.timestamp_millis();
                    commits
                        .iter()
                        .rev()
                        .find(|c| c.timestamp <= end_ms)
                        .map(|c| c.version)
                        .ok_or_else(|| {
                            TableReaderError::version_not_found(
                                "no table version exists at or before the ending timestamp",
                            )
                        })?
                }
                None => latest,
            };
            if start_v > end_v {
                return Err(TableReaderError::invalid_version_range(
                    "the starting timestamp must be before the ending timestamp",
                ));
            }
            Ok((start_v, end_v))
        }
    }
}

#[derive(Default)]
struct Replay {
    protocol: Option<Protocol>,
    metadata: Option<Metadata>,
    adds: BTreeMap<String, Add>,
    removed: HashSet<String>,
}

impl Replay {
    fn apply(&mut self, action: Action) {
        match action {
            Action::Protocol(protocol) => self.protocol = Some(protocol),
            Action::Metadata(metadata) => self.metadata = Some(metadata),
            Action::Add(add) => {
                self.removed.remove(&add.path);
                self.adds.insert(add.path.clone(), add);
            }
            Action::Remove(remove) => {
                self.adds.remove(&remove.path);
                self.removed.insert(remove.path);
            }
            Action::Cdc(_) | Action::CommitInfo(_) => {}
        }
    }

    fn into_table_data(self, version: u64) -> Result<TableData, TableReaderError> {
        let protocol = self.protocol.ok_or_else(|| {
            TableReaderError::incomplete_log("no protocol action found in the transaction log")
        })?;
        let metadata = self.metadata.ok_or_else(|| {
            TableReaderError::incomplete_log("no metadata action found in the transaction log")
        })?;
        let files = self.adds.into_values().map(TableFile::new).collect();
        Ok(TableData::new(version, protocol, metadata, files))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::TempDir;

    use crate::reader::TableReaderErrorKind;

    use super::*;

    const PROTOCOL: &str = r#"{"protocol":{"minReaderVersion":1,"minWriterVersion":2}}"#;

    fn metadata_line(configuration: &str) -> String {
        format!(
            r#"{{"metaData":{{"id":"t1","format":{{"provider":"parquet","options":{{}}}},"schemaString":"{{}}","partitionColumns":["date"],"configuration":{configuration}}}}}"#
        )
    }

    fn add_line(path: &str, date: &str) -> String {
        format!(
            r#"{{"add":{{"path":"{path}","partitionValues":{{"date":"{date}"}},"size":573,"modificationTime":1619824428000,"dataChange":true}}}}"#
        )
    }

    fn write_commit(root: &Path, version: u64, lines: &[String]) {
        let dir = root.join(LOG_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(commit_file_name(version)), lines.join("\n")).unwrap();
    }

    fn table_root() -> TempDir {
        TempDir::new().unwrap()
    }

    #[tokio::test]
    async fn missing_log_is_an_empty_table() {
        let root = table_root();
        let reader = DeltaLogReader::new();

        let version = reader
            .get_table_version_number(root.path().to_str().unwrap(), Version::Latest)
            .await
            .unwrap();
        assert_eq!(version.version(), 0);

        let data = reader
            .get_table_data(root.path().to_str().unwrap(), Version::Latest)
            .await
            .unwrap();
        assert_eq!(data.version(), 0);
        assert!(data.files().is_empty());
    }

    #[tokio::test]
    async fn replay_single_commit() {
        let root = table_root();
        write_commit(
            root.path(),
            0,
            &[
                PROTOCOL.to_owned(),
                metadata_line("{}"),
                add_line("date=2024-01-01/part-0.parquet", "2024-01-01"),
            ],
        );

        let reader = DeltaLogReader::new();
        let data = reader
            .get_table_data(root.path().to_str().unwrap(), Version::Latest)
            .await
            .unwrap();
        assert_eq!(data.version(), 0);
        assert_eq!(data.protocol().min_reader_version, 1);
        assert_eq!(data.metadata().id, "t1");
        assert_eq!(data.files().len(), 1);
        assert_eq!(data.files()[0].path(), "date=2024-01-01/part-0.parquet");
    }

    #[tokio::test]
    async fn removes_tombstone_earlier_adds() {
        let root = table_root();
        write_commit(
            root.path(),
            0,
            &[
                PROTOCOL.to_owned(),
                metadata_line("{}"),
                add_line("part-0.parquet", "2024-01-01"),
                add_line("part-1.parquet", "2024-01-02"),
            ],
        );
        write_commit(
            root.path(),
            1,
            &[
                r#"{"remove":{"path":"part-0.parquet","dataChange":true}}"#.to_owned(),
                add_line("part-2.parquet", "2024-01-03"),
            ],
        );

        let reader = DeltaLogReader::new();
        let data = reader
            .get_table_data(root.path().to_str().unwrap(), Version::Latest)
            .await
            .unwrap();
        assert_eq!(data.version(), 1);
        let paths: Vec<&str> = data.files().iter().map(|f| f.path()).collect();
        assert_eq!(paths, vec!["part-1.parquet", "part-2.parquet"]);

        // at version 0 the removed file is still live
        let data = reader
            .get_table_data(root.path().to_str().unwrap(), Version::Number(0))
            .await
            .unwrap();
        assert_eq!(data.files().len(), 2);
        assert_eq!(data.files()[0].path(), "part-0.parquet");
    }

    #[tokio::test]
    async fn re_added_file_is_live_again() {
        let root = table_root();
        write_commit(
            root.path(),
            0,
            &[
                PROTOCOL.to_owned(),
                metadata_line("{}"),
                add_line("part-0.parquet", "2024-01-01"),
            ],
        );
        write_commit(
            root.path(),
            1,
            &[r#"{"remove":{"path":"part-0.parquet","dataChange":true}}"#.to_owned()],
        );
        write_commit(root.path(), 2, &[add_line("part-0.parquet", "2024-01-01")]);

        let reader = DeltaLogReader::new();
        let data = reader
            .get_table_data(root.path().to_str().unwrap(), Version::Latest)
            .await
            .unwrap();
        assert_eq!(data.version(), 2);
        assert_eq!(data.files().len(), 1);
    }

    #[tokio::test]
    async fn missing_requested_version() {
        let root = table_root();
        write_commit(
            root.path(),
            0,
            &[PROTOCOL.to_owned(), metadata_line("{}")],
        );

        let reader = DeltaLogReader::new();
        let err = reader
            .get_table_data(root.path().to_str().unwrap(), Version::Number(7))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), TableReaderErrorKind::VersionNotFound);
    }

    #[tokio::test]
    async fn incomplete_log() {
        let root = table_root();
        write_commit(
            root.path(),
            0,
            &[add_line("part-0.parquet", "2024-01-01")],
        );

        let reader = DeltaLogReader::new();
        let err = reader
            .get_table_data(root.path().to_str().unwrap(), Version::Latest)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), TableReaderErrorKind::IncompleteLog);
    }

    #[tokio::test]
    async fn corrupt_log() {
        let root = table_root();
        write_commit(
            root.path(),
            0,
            &["definitely not json".to_owned(), "nor this".to_owned()],
        );

        let reader = DeltaLogReader::new();
        let err = reader
            .get_table_data(root.path().to_str().unwrap(), Version::Latest)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), TableReaderErrorKind::CorruptLog);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let root = table_root();
        write_commit(
            root.path(),
            0,
            &[
                PROTOCOL.to_owned(),
                "oops".to_owned(),
                metadata_line("{}"),
                add_line("part-0.parquet", "2024-01-01"),
            ],
        );

        let reader = DeltaLogReader::new();
        let data = reader
            .get_table_data(root.path().to_str().unwrap(), Version::Latest)
            .await
            .unwrap();
        assert_eq!(data.files().len(), 1);
    }

    #[tokio::test]
    async fn version_by_timestamp() {
        let root = table_root();
        write_commit(
            root.path(),
            0,
            &[
                r#"{"commitInfo":{"timestamp":1000}}"#.to_owned(),
                PROTOCOL.to_owned(),
                metadata_line("{}"),
            ],
        );
        write_commit(
            root.path(),
            1,
            &[
                r#"{"commitInfo":{"timestamp":2000}}"#.to_owned(),
                add_line("part-0.parquet", "2024-01-01"),
            ],
        );

        let reader = DeltaLogReader::new();
        let version = reader
            .get_table_version_number(
                root.path().to_str().unwrap(),
                Version::Timestamp(DateTime::from_timestamp_millis(1500).unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(version.version(), 1);

        let err = reader
            .get_table_version_number(
                root.path().to_str().unwrap(),
                Version::Timestamp(DateTime::from_timestamp_millis(99_999).unwrap()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), TableReaderErrorKind::VersionNotFound);
    }

    #[tokio::test]
    async fn changes_require_cdf() {
        let root = table_root();
        write_commit(
            root.path(),
            0,
            &[PROTOCOL.to_owned(), metadata_line("{}")],
        );

        let reader = DeltaLogReader::new();
        let err = reader
            .get_table_changes(
                root.path().to_str().unwrap(),
                VersionRange::Version {
                    start: 0,
                    end: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), TableReaderErrorKind::ChangeDataFeedDisabled);
        assert_eq!(err.message(), "Change data feed is not enabled");
    }

    #[tokio::test]
    async fn changes_emit_adds_and_removes() {
        let root = table_root();
        let cdf = r#"{"delta.enableChangeDataFeed":"true"}"#;
        write_commit(
            root.path(),
            0,
            &[
                r#"{"commitInfo":{"timestamp":1000}}"#.to_owned(),
                PROTOCOL.to_owned(),
                metadata_line(cdf),
                add_line("part-0.parquet", "2024-01-01"),
            ],
        );
        write_commit(
            root.path(),
            1,
            &[
                r#"{"commitInfo":{"timestamp":2000}}"#.to_owned(),
                r#"{"remove":{"path":"part-0.parquet","dataChange":true}}"#.to_owned(),
            ],
        );

        let reader = DeltaLogReader::new();
        let changes = reader
            .get_table_changes(
                root.path().to_str().unwrap(),
                VersionRange::Version {
                    start: 0,
                    end: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(changes.version(), 1);
        assert_eq!(changes.changes().len(), 2);
        assert_eq!(changes.changes()[0].change_type, ChangeType::Insert);
        assert_eq!(changes.changes()[0].version, 0);
        assert_eq!(changes.changes()[0].timestamp, 1000);
        assert_eq!(changes.changes()[1].change_type, ChangeType::Remove);
        assert_eq!(changes.changes()[1].version, 1);
    }

    #[tokio::test]
    async fn cdc_files_supersede_add_remove() {
        let root = table_root();
        let cdf = r#"{"delta.enableChangeDataFeed":"true"}"#;
        write_commit(
            root.path(),
            0,
            &[
                PROTOCOL.to_owned(),
                metadata_line(cdf),
                add_line("part-0.parquet", "2024-01-01"),
            ],
        );
        write_commit(
            root.path(),
            1,
            &[
                r#"{"cdc":{"path":"_change_data/cdc-0.parquet","partitionValues":{},"size":100}}"#
                    .to_owned(),
                r#"{"remove":{"path":"part-0.parquet","dataChange":true}}"#.to_owned(),
                add_line("part-1.parquet", "2024-01-01"),
            ],
        );

        let reader = DeltaLogReader::new();
        let changes = reader
            .get_table_changes(
                root.path().to_str().unwrap(),
                VersionRange::Version {
                    start: 1,
                    end: Some(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(changes.changes().len(), 1);
        assert_eq!(changes.changes()[0].path, "_change_data/cdc-0.parquet");
        assert_eq!(
            changes.changes()[0].change_type,
            ChangeType::UpdatePostimage
        );
    }

    #[tokio::test]
    async fn invalid_change_ranges() {
        let root = table_root();
        let cdf = r#"{"delta.enableChangeDataFeed":"true"}"#;
        write_commit(
            root.path(),
            0,
            &[PROTOCOL.to_owned(), metadata_line(cdf)],
        );

        let reader = DeltaLogReader::new();
        let err = reader
            .get_table_changes(
                root.path().to_str().unwrap(),
                VersionRange::Version {
                    start: 3,
                    end: Some(1),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), TableReaderErrorKind::InvalidVersionRange);

        let err = reader
            .get_table_changes(
                root.path().to_str().unwrap(),
                VersionRange::Version {
                    start: 0,
                    end: Some(9),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), TableReaderErrorKind::VersionNotFound);
    }

    #[test]
    fn log_dir_accepts_plain_paths_and_file_uris() {
        assert_eq!(
            log_dir("/data/table").unwrap(),
            PathBuf::from("/data/table/_delta_log")
        );
        assert_eq!(
            log_dir("file:///data/table").unwrap(),
            PathBuf::from("/data/table/_delta_log")
        );
        assert!(log_dir("s3://bucket/table").is_err());
    }
}
