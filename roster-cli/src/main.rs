//! Roster: facility roster reconciliation CLI.
//!
//! # Usage
//!
//! ```text
//! roster init --facility <id> --feed-url <url> [--interval <min>] [--removal retire|demote]
//! roster sync [--dry-run] [--feed <path-or-url>]
//! roster plan [--feed <path-or-url>] [--json]
//! roster status [--all] [--json]
//! roster daemon start|stop|status|sync
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, init::InitArgs, plan::PlanArgs, status::StatusArgs, sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "roster",
    version,
    about = "Keep a facility's local controller roster in line with the authoritative roster",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.roster/config.yaml for a facility.
    Init(InitArgs),

    /// Run one reconciliation pass now.
    Sync(SyncArgs),

    /// Show the operations the next pass would apply.
    Plan(PlanArgs),

    /// List local controller records.
    Status(StatusArgs),

    /// Run or control the scheduled reconciliation daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Plan(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
