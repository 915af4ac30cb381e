//! Data models for Tally

mod record;

pub use record::{RecordId, SurveyRecord, SyncState};
