//! Write-through persistence cache.
//!
//! Holds one in-memory record per table next to that table's [`TableStore`].
//! Completed rounds are appended to disk before [`PersistenceCache::record_round`]
//! returns; table records are written on [`flush`](PersistenceCache::flush) and
//! [`flush_all`](PersistenceCache::flush_all).
//!
//! File work runs on the blocking pool. Each table has its own lock, so a slow
//! write on one table never delays another.

use super::{Recovered, StoreError, StoreResult, TableStore};
use crate::{
    TableId,
    round::{RoundCounts, RoundOutcome, TableStatus},
    supervisor::ErrorSummary,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio::sync::RwLock;

/// Flushed view of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub table_id: TableId,
    pub status: TableStatus,
    pub state: String,
    pub rules: String,
    pub rounds_watched: u32,
    pub last_round_number: Option<u64>,
    pub last_outcomes: Vec<RoundOutcome>,
    pub counts: RoundCounts,
    pub errors: ErrorSummary,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    store: TableStore,
    record: Option<TableRecord>,
}

type Shared = Arc<Mutex<Entry>>;

pub struct PersistenceCache {
    dir: PathBuf,
    tables: RwLock<HashMap<TableId, Shared>>,
}

impl PersistenceCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open (or re-open) a table's files and return the rounds already on disk
    pub async fn open_table(&self, table_id: TableId) -> StoreResult<Recovered> {
        let dir = self.dir.clone();
        let (store, recovered) = run_blocking(move || TableStore::open(&dir, table_id)).await?;
        log::info!(
            "Table {}: Opened {} ({} rounds recovered)",
            table_id,
            store.rounds_path().display(),
            recovered.rounds.len()
        );

        let entry = Arc::new(Mutex::new(Entry {
            store,
            record: None,
        }));
        self.tables.write().await.insert(table_id, entry);
        Ok(recovered)
    }

    /// Append a completed round and replace the cached record.
    ///
    /// Returns once the round is synced to disk.
    pub async fn record_round(
        &self,
        table_id: TableId,
        outcome: RoundOutcome,
        record: TableRecord,
    ) -> StoreResult<()> {
        let entry = self.entry(table_id).await?;
        run_blocking(move || {
            let mut entry = entry.lock().map_err(|_| StoreError::Poisoned(table_id))?;
            entry.store.append(&outcome)?;
            entry.record = Some(record);
            Ok(())
        })
        .await
    }

    /// Replace the cached record without touching disk
    pub async fn update(&self, table_id: TableId, record: TableRecord) -> StoreResult<()> {
        let entry = self.entry(table_id).await?;
        let mut entry = entry.lock().map_err(|_| StoreError::Poisoned(table_id))?;
        entry.record = Some(record);
        Ok(())
    }

    pub async fn record(&self, table_id: TableId) -> Option<TableRecord> {
        let entry = self.entry(table_id).await.ok()?;
        let entry = entry.lock().ok()?;
        entry.record.clone()
    }

    /// Write one table's cached record to its state file
    pub async fn flush(&self, table_id: TableId) -> StoreResult<()> {
        let entry = self.entry(table_id).await?;
        run_blocking(move || {
            let entry = entry.lock().map_err(|_| StoreError::Poisoned(table_id))?;
            match &entry.record {
                Some(record) => entry.store.write_state(record),
                None => Ok(()),
            }
        })
        .await
    }

    /// Flush every table. All tables are attempted; the first error is returned.
    pub async fn flush_all(&self) -> StoreResult<usize> {
        let mut ids: Vec<TableId> = self.tables.read().await.keys().copied().collect();
        ids.sort_unstable();

        let mut first_error = None;
        let mut flushed = 0;
        for id in ids {
            match self.flush(id).await {
                Ok(()) => flushed += 1,
                Err(e) => {
                    log::error!("Table {}: Flush failed: {}", id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }

    /// Flush and forget a table
    pub async fn close_table(&self, table_id: TableId) -> StoreResult<()> {
        self.flush(table_id).await?;
        self.tables.write().await.remove(&table_id);
        Ok(())
    }

    async fn entry(&self, table_id: TableId) -> StoreResult<Shared> {
        self.tables
            .read()
            .await
            .get(&table_id)
            .cloned()
            .ok_or(StoreError::UnknownTable(table_id))
    }
}

async fn run_blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::round::{Decision, Winner};

    fn outcome(n: u64) -> RoundOutcome {
        RoundOutcome {
            round_number: n,
            started_at: Utc::now(),
            timer_start: 25,
            blue_score: 0,
            red_score: n as u32,
            winner: Winner::Red,
            decision: Decision::Red,
            pattern_matched: Some("BBB-B".into()),
            correct: Some(true),
        }
    }

    fn record(table_id: TableId, last: Option<u64>) -> TableRecord {
        TableRecord {
            table_id,
            status: TableStatus::Active,
            state: "deciding".into(),
            rules: "BBB-B".into(),
            rounds_watched: last.unwrap_or(0) as u32,
            last_round_number: last,
            last_outcomes: Vec::new(),
            counts: RoundCounts::default(),
            errors: ErrorSummary::default(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_record_round_is_on_disk_when_it_returns() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistenceCache::new(dir.path());
        cache.open_table(1).await.unwrap();
        cache
            .record_round(1, outcome(1), record(1, Some(1)))
            .await
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join("table_1.jsonl")).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert_eq!(cache.record(1).await.unwrap().last_round_number, Some(1));
    }

    #[tokio::test]
    async fn test_flush_all_writes_every_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistenceCache::new(dir.path());
        for id in 1..=3 {
            cache.open_table(id).await.unwrap();
            cache.update(id, record(id, None)).await.unwrap();
        }
        assert_eq!(cache.flush_all().await.unwrap(), 3);
        for id in 1..=3 {
            assert!(dir.path().join(format!("table_{id}_state.json")).exists());
        }
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistenceCache::new(dir.path());
        assert!(matches!(
            cache.flush(9).await,
            Err(StoreError::UnknownTable(9))
        ));
    }

    #[tokio::test]
    async fn test_reopen_recovers_rounds() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistenceCache::new(dir.path());
        cache.open_table(2).await.unwrap();
        for n in 1..=4 {
            cache
                .record_round(2, outcome(n), record(2, Some(n)))
                .await
                .unwrap();
        }
        cache.close_table(2).await.unwrap();
        let recovered = cache.open_table(2).await.unwrap();
        assert_eq!(recovered.rounds.len(), 4);
        assert!(matches!(
            cache.record_round(2, outcome(4), record(2, Some(4))).await,
            Err(StoreError::OutOfOrder { expected: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_round_write_failure_then_retry_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistenceCache::new(dir.path());
        cache.open_table(3).await.unwrap();
        for n in 1..=2 {
            cache
                .record_round(3, outcome(n), record(3, Some(n)))
                .await
                .unwrap();
        }

        // Block the rounds file with a directory so the next append cannot open it.
        let path = dir.path().join("table_3.jsonl");
        let moved = dir.path().join("table_3.jsonl.moved");
        std::fs::rename(&path, &moved).unwrap();
        std::fs::create_dir(&path).unwrap();
        assert!(matches!(
            cache.record_round(3, outcome(3), record(3, Some(3))).await,
            Err(StoreError::Io { .. })
        ));
        assert_eq!(cache.record(3).await.unwrap().last_round_number, Some(2));

        std::fs::remove_dir(&path).unwrap();
        std::fs::rename(&moved, &path).unwrap();
        cache
            .record_round(3, outcome(3), record(3, Some(3)))
            .await
            .unwrap();

        let (_, recovered) = TableStore::open(dir.path(), 3).unwrap();
        let numbers: Vec<u64> = recovered.rounds.iter().map(|r| r.round_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(recovered.skipped_lines, 0);
    }

    #[tokio::test]
    async fn test_concurrent_tables_keep_their_own_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(PersistenceCache::new(dir.path()));
        let mut tasks = Vec::new();
        for id in 1..=6 {
            cache.open_table(id).await.unwrap();
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                for n in 1..=20 {
                    cache
                        .record_round(id, outcome(n), record(id, Some(n)))
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        for id in 1..=6 {
            let (_, recovered) = TableStore::open(dir.path(), id).unwrap();
            let numbers: Vec<u64> = recovered.rounds.iter().map(|r| r.round_number).collect();
            assert_eq!(numbers, (1..=20).collect::<Vec<_>>());
        }
    }
}
