use std::path::Path;

use crate::commands::common::{open_store, parse_record_id};
use crate::error::CliError;

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let record_id = parse_record_id(id)?;

    let store = open_store(db_path).await?;
    store.delete(&record_id).await?;

    println!("Deleted {record_id}");
    Ok(())
}
