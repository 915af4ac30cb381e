use std::path::Path;

use crate::commands::common::{open_store, parse_record_id};
use crate::error::CliError;

pub async fn run_retry(id: &str, db_path: &Path) -> Result<(), CliError> {
    let record_id = parse_record_id(id)?;

    let store = open_store(db_path).await?;
    store.reset_for_retry(&record_id).await?;

    println!("Requeued {record_id}");
    Ok(())
}
