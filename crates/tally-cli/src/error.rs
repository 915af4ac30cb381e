use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tally_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No survey payload provided")]
    EmptyPayload,
    #[error("Survey payload is not valid JSON: {0}")]
    InvalidPayload(String),
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("Refusing to clear all records without --yes")]
    ClearNotConfirmed,
    #[error(
        "Intake endpoint is not configured. Set TALLY_API_URL (and TALLY_API_TOKEN if the service requires auth) to enable `tally sync`."
    )]
    IntakeNotConfigured,
}
