use std::path::Path;
use std::sync::Arc;

use tally_core::net::NetworkMonitor;
use tally_core::sync::{BackoffPolicy, SyncEngine};

use crate::commands::common::{intake_client_from_env, open_store};
use crate::error::CliError;

pub async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let client = Arc::new(intake_client_from_env()?);
    // The CLI runs on demand; assume online and let transport errors fall
    // into the engine's transient handling.
    let network = NetworkMonitor::new(true);

    let engine = SyncEngine::new(store, client, network, BackoffPolicy::default()).await?;
    let summary = engine.sync_now().await?;

    if summary.halted_on_auth {
        println!(
            "Sync halted: authentication expired. Refresh TALLY_API_TOKEN and run `tally sync` again."
        );
    } else if summary.submitted == 0 {
        println!("Nothing to sync");
    } else {
        println!(
            "Synced {} of {} record(s); {} failed",
            summary.succeeded, summary.submitted, summary.failed
        );
    }

    let status = engine.status();
    if status.pending_count > 0 {
        println!("{} record(s) still pending", status.pending_count);
    }
    Ok(())
}
