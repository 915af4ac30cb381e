use std::path::Path;

use crate::commands::common::{format_record_lines, open_store, record_to_list_item, RecordListItem};
use crate::error::CliError;

pub async fn run_list(
    limit: usize,
    pending_only: bool,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let records = if pending_only {
        store.list_pending().await?
    } else {
        store.list_all(limit, 0).await?
    };

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No records captured yet.");
        return Ok(());
    }

    for line in format_record_lines(&records) {
        println!("{line}");
    }
    Ok(())
}
