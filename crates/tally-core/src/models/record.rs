//! Survey record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for a captured survey, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Synchronization state of a captured record.
///
/// `Syncing` is an engine-exclusive transient lock state; `Synced` is
/// terminal. `Pending` and non-terminal `Failed` records are eligible for
/// retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SyncState {
    /// Storage representation of this state
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown sync state: {other}"
            ))),
        }
    }
}

/// One captured survey awaiting or having completed delivery to the server.
///
/// The payload is opaque to the engine; its schema is owned by the form
/// layer. A record is created exactly once at capture time and the same `id`
/// is resubmitted on every retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyRecord {
    /// Unique identifier, generated at capture time and never regenerated
    pub id: RecordId,
    /// Opaque survey data
    pub payload: serde_json::Value,
    /// Capture timestamp (Unix ms), immutable
    pub created_at: i64,
    /// Current synchronization state
    pub sync_state: SyncState,
    /// Number of submission attempts so far
    pub attempts: u32,
    /// Reason for the most recent failure, if any
    pub last_error: Option<String>,
    /// True when the last rejection was permanent; terminal failures are
    /// excluded from automatic retry but stay visible for inspection
    pub terminal: bool,
    /// Unix ms before which the engine must not retry this record (0 =
    /// immediately eligible)
    pub next_attempt_at: i64,
    /// When the server accepted this record (Unix ms)
    pub synced_at: Option<i64>,
    /// Reference returned by the intake service on acceptance
    pub server_reference: Option<String>,
}

impl SurveyRecord {
    /// Create a new record in `Pending` state with the given payload
    #[must_use]
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: RecordId::new(),
            payload,
            created_at: chrono::Utc::now().timestamp_millis(),
            sync_state: SyncState::Pending,
            attempts: 0,
            last_error: None,
            terminal: false,
            next_attempt_at: 0,
            synced_at: None,
            server_reference: None,
        }
    }

    /// Whether the engine may pick this record up again
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self.sync_state {
            SyncState::Pending => true,
            SyncState::Failed => !self.terminal,
            SyncState::Syncing | SyncState::Synced => false,
        }
    }

    /// Whether this record is retryable and its backoff deadline has passed
    #[must_use]
    pub const fn is_eligible(&self, now_ms: i64) -> bool {
        self.is_retryable() && self.next_attempt_at <= now_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_unique() {
        let id1 = RecordId::new();
        let id2 = RecordId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_record_id_parse() {
        let id = RecordId::new();
        let parsed: RecordId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_record_new() {
        let record = SurveyRecord::new(serde_json::json!({"village": "Amlagora"}));
        assert_eq!(record.sync_state, SyncState::Pending);
        assert_eq!(record.attempts, 0);
        assert!(record.created_at > 0);
        assert!(record.is_retryable());
        assert!(record.is_eligible(record.created_at));
    }

    #[test]
    fn test_sync_state_round_trip() {
        for state in [
            SyncState::Pending,
            SyncState::Syncing,
            SyncState::Synced,
            SyncState::Failed,
        ] {
            let parsed: SyncState = state.as_str().parse().unwrap();
            assert_eq!(parsed, state);
        }
        assert!("half-synced".parse::<SyncState>().is_err());
    }

    #[test]
    fn test_terminal_failure_not_retryable() {
        let mut record = SurveyRecord::new(serde_json::json!({}));
        record.sync_state = SyncState::Failed;
        assert!(record.is_retryable());

        record.terminal = true;
        assert!(!record.is_retryable());
    }

    #[test]
    fn test_backoff_deadline_gates_eligibility() {
        let mut record = SurveyRecord::new(serde_json::json!({}));
        record.sync_state = SyncState::Failed;
        record.next_attempt_at = record.created_at + 60_000;

        assert!(record.is_retryable());
        assert!(!record.is_eligible(record.created_at));
        assert!(record.is_eligible(record.created_at + 60_000));
    }
}
