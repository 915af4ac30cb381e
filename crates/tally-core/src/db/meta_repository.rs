//! Sync metadata repository implementation

use crate::error::Result;
use libsql::Connection;

const LAST_SYNC_TIME_KEY: &str = "last_sync_time";

/// Trait for scalar sync metadata operations (async)
#[allow(async_fn_in_trait)]
pub trait SyncMetaRepository {
    /// When the last drain pass completed (Unix ms), if any
    async fn load_last_sync_time(&self) -> Result<Option<i64>>;

    /// Record the completion time of a drain pass
    async fn store_last_sync_time(&self, timestamp_ms: i64) -> Result<()>;

    /// Forget the recorded last sync time
    async fn clear_last_sync_time(&self) -> Result<()>;
}

/// libSQL implementation of `SyncMetaRepository`
pub struct LibSqlSyncMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSyncMetaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncMetaRepository for LibSqlSyncMetaRepository<'_> {
    async fn load_last_sync_time(&self) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT value FROM sync_meta WHERE key = ?",
                [LAST_SYNC_TIME_KEY],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(value.parse().ok())
        } else {
            Ok(None)
        }
    }

    async fn store_last_sync_time(&self, timestamp_ms: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
                [LAST_SYNC_TIME_KEY, timestamp_ms.to_string().as_str()],
            )
            .await?;
        Ok(())
    }

    async fn clear_last_sync_time(&self) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM sync_meta WHERE key = ?",
                [LAST_SYNC_TIME_KEY],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_absent_last_sync_time() {
        let db = setup().await;
        let repo = LibSqlSyncMetaRepository::new(db.connection());

        assert_eq!(repo.load_last_sync_time().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_store_and_load_last_sync_time() {
        let db = setup().await;
        let repo = LibSqlSyncMetaRepository::new(db.connection());

        repo.store_last_sync_time(1_700_000_000_000).await.unwrap();
        assert_eq!(
            repo.load_last_sync_time().await.unwrap(),
            Some(1_700_000_000_000)
        );

        // Overwrite keeps a single scalar
        repo.store_last_sync_time(1_700_000_060_000).await.unwrap();
        assert_eq!(
            repo.load_last_sync_time().await.unwrap(),
            Some(1_700_000_060_000)
        );

        repo.clear_last_sync_time().await.unwrap();
        assert_eq!(repo.load_last_sync_time().await.unwrap(), None);
    }
}
