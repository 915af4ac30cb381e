use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tally_core::services::RecordStore;
use tally_core::submit::HttpSubmissionClient;
use tally_core::util::normalize_text_option;
use tally_core::{RecordId, SurveyRecord};

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub state: String,
    pub attempts: u32,
    pub created_at: i64,
    pub relative_time: String,
    pub last_error: Option<String>,
    pub server_reference: Option<String>,
}

pub async fn open_store(db_path: &Path) -> Result<RecordStore, CliError> {
    Ok(RecordStore::open_path(db_path.to_path_buf()).await?)
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TALLY_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| panic!("Failed to resolve CLI data directory"))
        .join("tally")
        .join("tally.db")
}

/// Build the intake client from `TALLY_API_URL` / `TALLY_API_TOKEN`.
pub fn intake_client_from_env() -> Result<HttpSubmissionClient, CliError> {
    let Some(endpoint) = normalize_text_option(env::var("TALLY_API_URL").ok()) else {
        return Err(CliError::IntakeNotConfigured);
    };
    let token = normalize_text_option(env::var("TALLY_API_TOKEN").ok());
    Ok(HttpSubmissionClient::new(endpoint, token)?)
}

/// Resolve the survey payload from args or piped stdin, as JSON.
pub fn resolve_payload(payload_parts: &[String]) -> Result<serde_json::Value, CliError> {
    let raw = if payload_parts.is_empty() {
        read_piped_stdin()?.ok_or(CliError::EmptyPayload)?
    } else {
        payload_parts.join(" ")
    };

    parse_payload(&raw)
}

pub fn parse_payload(raw: &str) -> Result<serde_json::Value, CliError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyPayload);
    }
    serde_json::from_str(trimmed).map_err(|error| CliError::InvalidPayload(error.to_string()))
}

pub fn parse_record_id(id: &str) -> Result<RecordId, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyRecordId);
    }
    trimmed
        .parse()
        .map_err(|_| CliError::RecordNotFound(trimmed.to_string()))
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

pub fn format_record_lines(records: &[SurveyRecord]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let id = record.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let state = record.sync_state.to_string();
            let relative_time = format_relative_time(record.created_at, now_ms);

            let detail = if record.terminal {
                format!("  !{}", record.last_error.as_deref().unwrap_or("rejected"))
            } else if let Some(reference) = record.server_reference.as_deref() {
                format!("  ref={reference}")
            } else {
                String::new()
            };

            format!("{short_id:<13}  {state:<8}  {:>2} attempt(s)  {relative_time}{detail}",
                record.attempts)
        })
        .collect()
}

pub fn record_to_list_item(record: &SurveyRecord) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    RecordListItem {
        id: record.id.to_string(),
        state: record.sync_state.to_string(),
        attempts: record.attempts,
        created_at: record.created_at,
        relative_time: format_relative_time(record.created_at, now_ms),
        last_error: record.last_error.clone(),
        server_reference: record.server_reference.clone(),
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
