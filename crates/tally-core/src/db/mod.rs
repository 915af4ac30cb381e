//! Database layer for Tally

mod connection;
mod meta_repository;
mod migrations;
mod repository;

pub use connection::Database;
pub use meta_repository::{LibSqlSyncMetaRepository, SyncMetaRepository};
pub use repository::{LibSqlRecordRepository, RecordRepository};
