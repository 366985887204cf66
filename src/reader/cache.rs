//! Memoization of table snapshots.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use moka::future::Cache;

use super::{TableData, TableReaderError};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct SnapshotKey {
    table_id: String,
    generation: u64,
    version: u64,
}

/// A capacity-bounded cache of table snapshots keyed by table and version.
///
/// Loads for the same key are coalesced so the transaction log is replayed
/// at most once concurrently per snapshot, and failed loads are never
/// cached. Entries are immutable once stored; invalidation bumps a
/// per-table generation so superseded entries simply age out.
pub struct SnapshotCache {
    cache: Cache<SnapshotKey, Arc<TableData>>,
    generations: RwLock<HashMap<String, u64>>,
}

impl SnapshotCache {
    /// Create a new cache holding up to `capacity` snapshots, each for at
    /// most `ttl` when one is given.
    pub fn new(capacity: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().max_capacity(capacity);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            cache: builder.build(),
            generations: RwLock::new(HashMap::new()),
        }
    }

    fn generation(&self, table_id: &str) -> u64 {
        self.generations
            .read()
            .expect("generation lock")
            .get(table_id)
            .copied()
            .unwrap_or(0)
    }

    /// Get the snapshot of a table at a concrete version, loading it at
    /// most once per concurrent burst of callers.
    pub async fn get_or_load<F>(
        &self,
        table_id: &str,
        version: u64,
        load: F,
    ) -> Result<Arc<TableData>, TableReaderError>
    where
        F: Future<Output = Result<TableData, TableReaderError>> + Send,
    {
        let key = SnapshotKey {
            table_id: table_id.to_owned(),
            generation: self.generation(table_id),
            version,
        };
        self.cache
            .try_get_with(key, async move { load.await.map(Arc::new) })
            .await
            .map_err(|e: Arc<TableReaderError>| (*e).clone())
    }

    /// Drop every cached snapshot of the given table.
    ///
    /// Called when the catalog mutates a table; the old entries become
    /// unreachable immediately and are evicted by capacity over time.
    pub fn invalidate_table(&self, table_id: &str) {
        let mut generations = self.generations.write().expect("generation lock");
        *generations.entry(table_id.to_owned()).or_insert(0) += 1;
    }

    /// Number of snapshots currently cached.
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
