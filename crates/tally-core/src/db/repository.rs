//! Survey record repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use crate::error::{Error, Result};
use crate::models::{RecordId, SurveyRecord, SyncState};
use libsql::{params, Connection, Row};

const RECORD_COLUMNS: &str = "id, payload, created_at, sync_state, attempts, last_error, \
     terminal, next_attempt_at, synced_at, server_reference";

/// Retryable records: pending, or failed without a permanent rejection.
const RETRYABLE_PREDICATE: &str =
    "(sync_state = 'pending' OR (sync_state = 'failed' AND terminal = 0))";

/// Trait for record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// Persist a new record in `Pending` state; durable before returning
    async fn append(&self, payload: &serde_json::Value) -> Result<SurveyRecord>;

    /// Get a record by ID
    async fn get(&self, id: &RecordId) -> Result<Option<SurveyRecord>>;

    /// List retryable records (pending + non-terminal failed), oldest first
    async fn list_pending(&self) -> Result<Vec<SurveyRecord>>;

    /// Like [`Self::list_pending`], restricted to records whose backoff
    /// deadline has passed
    async fn list_eligible(&self, now_ms: i64) -> Result<Vec<SurveyRecord>>;

    /// Count retryable records
    async fn count_pending(&self) -> Result<usize>;

    /// List all records regardless of state, newest first
    async fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<SurveyRecord>>;

    /// Atomically claim a record for submission: retryable -> `Syncing`.
    ///
    /// Returns false when the record is missing, already claimed, already
    /// synced, or terminally failed. This is the mutual-exclusion primitive
    /// the engine relies on to never double-submit an id.
    async fn mark_syncing(&self, id: &RecordId) -> Result<bool>;

    /// `Syncing` -> `Synced`; idempotent if already `Synced`
    async fn mark_synced(&self, id: &RecordId, server_reference: Option<&str>) -> Result<()>;

    /// `Syncing` -> retryable `Failed`: increments attempts, records the
    /// reason and the next-eligible-attempt deadline
    async fn mark_failed(&self, id: &RecordId, reason: &str, next_attempt_at: i64) -> Result<()>;

    /// `Syncing` -> terminal `Failed`: the record stays visible but is
    /// excluded from automatic retry until [`Self::reset_for_retry`]
    async fn mark_rejected(&self, id: &RecordId, reason: &str) -> Result<()>;

    /// `Syncing` -> `Pending` without counting an attempt (auth-expiry halt)
    async fn release_syncing(&self, id: &RecordId) -> Result<()>;

    /// Manual requeue: `Failed` -> `Pending`, clearing error and backoff
    async fn reset_for_retry(&self, id: &RecordId) -> Result<()>;

    /// Reset crash-orphaned `Syncing` records to `Pending`; returns how many
    async fn recover_orphaned(&self) -> Result<usize>;

    /// Delete a record (explicit user-initiated removal only)
    async fn delete(&self, id: &RecordId) -> Result<()>;

    /// Delete every record; returns how many were removed
    async fn clear_all(&self) -> Result<usize>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &Row) -> Result<SurveyRecord> {
        let id: String = row.get(0)?;
        let payload: String = row.get(1)?;
        let sync_state: String = row.get(3)?;
        let attempts: i64 = row.get(4)?;

        Ok(SurveyRecord {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid record id: {id}")))?,
            payload: serde_json::from_str(&payload)?,
            created_at: row.get(2)?,
            sync_state: sync_state.parse()?,
            attempts: u32::try_from(attempts).unwrap_or(0),
            last_error: row.get(5)?,
            terminal: row.get::<i32>(6)? != 0,
            next_attempt_at: row.get(7)?,
            synced_at: row.get(8)?,
            server_reference: row.get(9)?,
        })
    }

    async fn collect_records(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<SurveyRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }

    /// Map a zero-row engine transition to a precise error
    async fn transition_error(&self, id: &RecordId) -> Error {
        match self.get(id).await {
            Ok(Some(record)) => Error::InvalidInput(format!(
                "record {id} is {}, expected syncing",
                record.sync_state
            )),
            Ok(None) => Error::NotFound(id.to_string()),
            Err(error) => error,
        }
    }
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn append(&self, payload: &serde_json::Value) -> Result<SurveyRecord> {
        let record = SurveyRecord::new(payload.clone());
        let encoded = serde_json::to_string(&record.payload)?;

        self.conn
            .execute(
                "INSERT INTO records (id, payload, created_at, sync_state, attempts, terminal, next_attempt_at)
                 VALUES (?, ?, ?, ?, 0, 0, 0)",
                params![
                    record.id.as_str(),
                    encoded,
                    record.created_at,
                    record.sync_state.as_str()
                ],
            )
            .await?;

        Ok(record)
    }

    async fn get(&self, id: &RecordId) -> Result<Option<SurveyRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?"),
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_pending(&self) -> Result<Vec<SurveyRecord>> {
        self.collect_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE {RETRYABLE_PREDICATE}
                 ORDER BY created_at ASC, id ASC"
            ),
            (),
        )
        .await
    }

    async fn list_eligible(&self, now_ms: i64) -> Result<Vec<SurveyRecord>> {
        self.collect_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE {RETRYABLE_PREDICATE} AND next_attempt_at <= ?
                 ORDER BY created_at ASC, id ASC"
            ),
            params![now_ms],
        )
        .await
    }

    async fn count_pending(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT COUNT(*) FROM records WHERE {RETRYABLE_PREDICATE}"),
                (),
            )
            .await?;

        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<SurveyRecord>> {
        self.collect_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 ORDER BY created_at DESC
                 LIMIT ? OFFSET ?"
            ),
            params![limit as i64, offset as i64],
        )
        .await
    }

    async fn mark_syncing(&self, id: &RecordId) -> Result<bool> {
        // Single-statement compare-and-swap; SQLite serializes writers, so
        // two concurrent claims can never both see a retryable state.
        let rows = self
            .conn
            .execute(
                &format!(
                    "UPDATE records SET sync_state = 'syncing'
                     WHERE id = ? AND {RETRYABLE_PREDICATE}"
                ),
                params![id.as_str()],
            )
            .await?;

        Ok(rows > 0)
    }

    async fn mark_synced(&self, id: &RecordId, server_reference: Option<&str>) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let rows = if let Some(reference) = server_reference {
            self.conn
                .execute(
                    "UPDATE records SET sync_state = 'synced', synced_at = ?,
                         server_reference = ?, last_error = NULL
                     WHERE id = ? AND sync_state = 'syncing'",
                    params![now, reference, id.as_str()],
                )
                .await?
        } else {
            self.conn
                .execute(
                    "UPDATE records SET sync_state = 'synced', synced_at = ?,
                         server_reference = NULL, last_error = NULL
                     WHERE id = ? AND sync_state = 'syncing'",
                    params![now, id.as_str()],
                )
                .await?
        };

        if rows > 0 {
            return Ok(());
        }

        match self.get(id).await? {
            Some(record) if record.sync_state == SyncState::Synced => Ok(()),
            Some(record) => Err(Error::InvalidInput(format!(
                "record {id} is {}, expected syncing",
                record.sync_state
            ))),
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    async fn mark_failed(&self, id: &RecordId, reason: &str, next_attempt_at: i64) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE records SET sync_state = 'failed', attempts = attempts + 1,
                     last_error = ?, terminal = 0, next_attempt_at = ?
                 WHERE id = ? AND sync_state = 'syncing'",
                params![reason, next_attempt_at, id.as_str()],
            )
            .await?;

        if rows > 0 {
            Ok(())
        } else {
            Err(self.transition_error(id).await)
        }
    }

    async fn mark_rejected(&self, id: &RecordId, reason: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE records SET sync_state = 'failed', attempts = attempts + 1,
                     last_error = ?, terminal = 1, next_attempt_at = 0
                 WHERE id = ? AND sync_state = 'syncing'",
                params![reason, id.as_str()],
            )
            .await?;

        if rows > 0 {
            Ok(())
        } else {
            Err(self.transition_error(id).await)
        }
    }

    async fn release_syncing(&self, id: &RecordId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE records SET sync_state = 'pending'
                 WHERE id = ? AND sync_state = 'syncing'",
                params![id.as_str()],
            )
            .await?;

        if rows > 0 {
            Ok(())
        } else {
            Err(self.transition_error(id).await)
        }
    }

    async fn reset_for_retry(&self, id: &RecordId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE records SET sync_state = 'pending', terminal = 0,
                     last_error = NULL, next_attempt_at = 0
                 WHERE id = ? AND sync_state = 'failed'",
                params![id.as_str()],
            )
            .await?;

        if rows > 0 {
            return Ok(());
        }

        match self.get(id).await? {
            Some(record) => Err(Error::InvalidInput(format!(
                "record {id} is {}, expected failed",
                record.sync_state
            ))),
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    async fn recover_orphaned(&self) -> Result<usize> {
        let rows = self
            .conn
            .execute(
                "UPDATE records SET sync_state = 'pending' WHERE sync_state = 'syncing'",
                (),
            )
            .await?;

        Ok(usize::try_from(rows).unwrap_or(0))
    }

    async fn delete(&self, id: &RecordId) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM records WHERE id = ?", params![id.as_str()])
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn clear_all(&self) -> Result<usize> {
        let rows = self.conn.execute("DELETE FROM records", ()).await?;
        Ok(usize::try_from(rows).unwrap_or(0))
    }
}
