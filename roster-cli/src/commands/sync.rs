//! `roster sync`: run one reconciliation pass against the local store.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use roster_sync::{pipeline, SyncError};

/// Arguments for `roster sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Report what would change without writing the store.
    #[arg(long)]
    pub dry_run: bool,

    /// Read the authoritative roster from this path or URL instead of the
    /// configured feed.
    #[arg(long, value_name = "PATH_OR_URL")]
    pub feed: Option<String>,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        roster_daemon::init_tracing("warn");
        let home = super::home_dir()?;
        let config = super::load_config(&home, self.feed)?;

        let summary = match pipeline::run(&home, &config, self.dry_run) {
            Err(err @ SyncError::PassInProgress { .. }) => {
                bail!("{err}; retry once it finishes, or queue one with `roster daemon sync`")
            }
            outcome => outcome
                .with_context(|| format!("sync failed for facility '{}'", config.facility))?,
        };

        if summary.is_noop() {
            let prefix = if summary.dry_run { "[dry-run] " } else { "" };
            println!("{prefix}✓ '{}': roster already up to date", config.facility);
            return Ok(());
        }

        print!("{summary}");
        if !summary.failed.is_empty() {
            println!(
                "{}",
                format!(
                    "{} operation(s) failed; they will be retried on the next pass",
                    summary.failed.len()
                )
                .yellow()
            );
        }
        Ok(())
    }
}
