//! Tally CLI - Capture field surveys from the command line
//!
//! Records are captured into a durable local queue and delivered to the
//! intake service with `tally sync`, so capture works with no connectivity.

mod cli;
mod commands;
mod error;

use clap::{CommandFactory, Parser};

use cli::{Cli, Commands};
use commands::add::run_add;
use commands::clear::run_clear;
use commands::common::resolve_db_path;
use commands::completions::run_completions;
use commands::delete::run_delete;
use commands::list::run_list;
use commands::retry::run_retry;
use commands::status::run_status;
use commands::sync::run_sync;
use error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tally_core=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Some(Commands::Add { payload }) => run_add(&payload, &db_path).await?,
        Some(Commands::List {
            limit,
            pending,
            json,
        }) => run_list(limit, pending, json, &db_path).await?,
        Some(Commands::Status { json }) => run_status(json, &db_path).await?,
        Some(Commands::Sync) => run_sync(&db_path).await?,
        Some(Commands::Retry { id }) => run_retry(&id, &db_path).await?,
        Some(Commands::Delete { id }) => run_delete(&id, &db_path).await?,
        Some(Commands::Clear { yes }) => run_clear(yes, &db_path).await?,
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            // Quick capture mode: tally '{"village": "Amlagora"}'
            if cli.payload.is_empty() {
                Cli::command().print_help().map_err(CliError::Io)?;
                println!();
            } else {
                run_add(&cli.payload, &db_path).await?;
            }
        }
    }

    Ok(())
}
