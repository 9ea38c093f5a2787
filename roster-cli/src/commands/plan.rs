//! `roster plan`: print the operations the next pass would apply.

use anyhow::{Context, Result};
use clap::Args;

use roster_sync::pipeline;

/// Arguments for `roster plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Read the authoritative roster from this path or URL instead of the
    /// configured feed.
    #[arg(long, value_name = "PATH_OR_URL")]
    pub feed: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        roster_daemon::init_tracing("warn");
        let home = super::home_dir()?;
        let config = super::load_config(&home, self.feed)?;

        let plan = pipeline::preview(&home, &config)
            .with_context(|| format!("planning failed for facility '{}'", config.facility))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("failed to serialize plan JSON")?
            );
            return Ok(());
        }

        if plan.is_empty() {
            println!("No changes for '{}'.", config.facility);
            return Ok(());
        }

        for operation in &plan.operations {
            println!("  {operation}");
        }
        for skipped in &plan.skipped {
            println!("  skip {} {}: {}", skipped.cid, skipped.name, skipped.reason);
        }
        println!(
            "{} operation(s), {} skipped",
            plan.operations.len(),
            plan.skipped.len()
        );
        Ok(())
    }
}
