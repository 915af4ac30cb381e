use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Capture field surveys offline and sync them when you can")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Quick capture: tally '{"village": "Amlagora", ...}'
    #[arg(trailing_var_arg = true)]
    pub payload: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture a new survey record
    #[command(alias = "capture")]
    Add {
        /// Survey payload as JSON (stdin is read when omitted)
        payload: Vec<String>,
    },
    /// List captured records and their sync state
    List {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Only records still awaiting delivery
        #[arg(long)]
        pending: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show pending count and last sync time
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drain pending records to the intake service
    Sync,
    /// Requeue a permanently failed record after correcting it
    Retry {
        /// Record ID
        id: String,
    },
    /// Delete a captured record
    Delete {
        /// Record ID
        id: String,
    },
    /// Delete every record and reset sync metadata
    Clear {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
