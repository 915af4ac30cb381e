//! Thread-safe record store service wrapper used across clients.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    Database, LibSqlRecordRepository, LibSqlSyncMetaRepository, RecordRepository,
    SyncMetaRepository,
};
use crate::models::{RecordId, SurveyRecord};
use crate::Result;

/// Thread-safe service for record and sync-metadata operations.
///
/// The single source of truth for the durable queue. Opening the store runs
/// migrations and resets crash-orphaned `Syncing` records to `Pending`, so a
/// process killed mid-submit never strands a record.
#[derive(Clone)]
pub struct RecordStore {
    db: Arc<Mutex<Database>>,
}

impl RecordStore {
    /// Open a record store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        Self::from_database(db).await
    }

    /// Open an in-memory record store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self> {
        let store = Self {
            db: Arc::new(Mutex::new(db)),
        };
        store.recover_orphaned().await?;
        Ok(store)
    }

    /// Reset crash-orphaned `Syncing` records; returns how many were reset.
    pub async fn recover_orphaned(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        let recovered = repo.recover_orphaned().await?;
        if recovered > 0 {
            tracing::warn!("Recovered {recovered} record(s) orphaned mid-sync");
        }
        Ok(recovered)
    }

    /// Persist a new captured record; durable before returning.
    pub async fn append(&self, payload: &serde_json::Value) -> Result<SurveyRecord> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.append(payload).await
    }

    /// Fetch a record by id.
    pub async fn get(&self, id: &RecordId) -> Result<Option<SurveyRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.get(id).await
    }

    /// List retryable records, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<SurveyRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.list_pending().await
    }

    /// List retryable records whose backoff deadline has passed, oldest first.
    pub async fn list_eligible(&self, now_ms: i64) -> Result<Vec<SurveyRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.list_eligible(now_ms).await
    }

    /// Count retryable records.
    pub async fn count_pending(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.count_pending().await
    }

    /// List all records, newest first.
    pub async fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<SurveyRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.list_all(limit, offset).await
    }

    /// Atomically claim a record for submission.
    pub async fn mark_syncing(&self, id: &RecordId) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.mark_syncing(id).await
    }

    /// Record a server acceptance.
    pub async fn mark_synced(&self, id: &RecordId, server_reference: Option<&str>) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.mark_synced(id, server_reference).await
    }

    /// Record a transient failure and its retry deadline.
    pub async fn mark_failed(
        &self,
        id: &RecordId,
        reason: &str,
        next_attempt_at: i64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.mark_failed(id, reason, next_attempt_at).await
    }

    /// Record a permanent rejection.
    pub async fn mark_rejected(&self, id: &RecordId, reason: &str) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.mark_rejected(id, reason).await
    }

    /// Return a claimed record to `Pending` without counting an attempt.
    pub async fn release_syncing(&self, id: &RecordId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.release_syncing(id).await
    }

    /// Manually requeue a failed record after correction.
    pub async fn reset_for_retry(&self, id: &RecordId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.reset_for_retry(id).await
    }

    /// Delete a record (explicit user action).
    pub async fn delete(&self, id: &RecordId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.delete(id).await
    }

    /// Delete every record and forget the last sync time.
    pub async fn clear_all(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let records = LibSqlRecordRepository::new(db.connection());
        let removed = records.clear_all().await?;
        let meta = LibSqlSyncMetaRepository::new(db.connection());
        meta.clear_last_sync_time().await?;
        Ok(removed)
    }

    /// When the last drain pass completed, if ever.
    pub async fn last_sync_time(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        let meta = LibSqlSyncMetaRepository::new(db.connection());
        meta.load_last_sync_time().await
    }

    /// Record the completion time of a drain pass.
    pub async fn set_last_sync_time(&self, timestamp_ms: i64) -> Result<()> {
        let db = self.db.lock().await;
        let meta = LibSqlSyncMetaRepository::new(db.connection());
        meta.store_last_sync_time(timestamp_ms).await
    }
}
