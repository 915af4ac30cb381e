use std::path::Path;

use crate::commands::common::{open_store, resolve_payload};
use crate::error::CliError;

pub async fn run_add(payload_parts: &[String], db_path: &Path) -> Result<(), CliError> {
    let payload = resolve_payload(payload_parts)?;

    let store = open_store(db_path).await?;
    let record = store.append(&payload).await?;

    println!("{}", record.id);
    Ok(())
}
