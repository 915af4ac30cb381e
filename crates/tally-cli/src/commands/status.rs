use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use crate::commands::common::{format_relative_time, format_sync_timestamp, open_store};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct StatusItem {
    pending_count: usize,
    last_sync_time: Option<i64>,
    last_sync_age: Option<String>,
}

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let pending_count = store.count_pending().await?;
    let last_sync_time = store.last_sync_time().await?;

    let now_ms = Utc::now().timestamp_millis();
    let last_sync_age = last_sync_time.map(|ts| format_relative_time(ts, now_ms));

    if as_json {
        let item = StatusItem {
            pending_count,
            last_sync_time,
            last_sync_age,
        };
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    println!("Pending: {pending_count}");
    match last_sync_time {
        Some(ts) => println!(
            "Last sync: {} ({})",
            last_sync_age.unwrap_or_default(),
            format_sync_timestamp(ts)
        ),
        None => println!("Last sync: never"),
    }
    Ok(())
}
