//! `roster init --facility <id> --feed-url <url> [--interval <min>] [--removal ...]`

use anyhow::{Context, Result};
use clap::Args;

use roster_core::config::{self, MAX_INTERVAL_MINUTES, MIN_INTERVAL_MINUTES};
use roster_core::{RemovalPolicy, RosterConfig};

/// Write the roster config for a facility.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Facility identifier (e.g. "ZAB").
    #[arg(long, short = 'f')]
    pub facility: String,

    /// Authoritative roster: https:// URL, file:// URL or a local path.
    #[arg(long)]
    pub feed_url: String,

    /// API key sent with feed requests. `ROSTER_FEED_API_KEY` overrides it.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Minutes between scheduled passes (10-30).
    #[arg(long, default_value_t = MAX_INTERVAL_MINUTES)]
    pub interval: u64,

    /// What to do with controllers that leave the roster: retire | demote.
    #[arg(long, default_value_t = RemovalPolicy::Retire)]
    pub removal: RemovalPolicy,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let path = config::config_path_at(&home);
        if path.exists() {
            println!("✓ Already initialized: {}", path.display());
            return Ok(());
        }

        if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&self.interval) {
            println!(
                "note: interval {} is outside {MIN_INTERVAL_MINUTES}-{MAX_INTERVAL_MINUTES} minutes and will be clamped",
                self.interval
            );
        }

        let mut roster_config = RosterConfig::new(self.facility, self.feed_url);
        roster_config.feed.api_key = self.api_key;
        roster_config.interval_minutes = self.interval;
        roster_config.removal = self.removal;

        let saved = config::init_at(&home, roster_config)
            .with_context(|| format!("failed to write config at {}", path.display()))?;

        println!("✓ Initialized facility '{}'", saved.facility);
        println!("  Feed:     {}", saved.feed.url);
        println!(
            "  Schedule: every {} minutes, removal policy '{}'",
            saved.interval().as_secs() / 60,
            saved.removal
        );
        println!("  Saved to: {}", path.display());
        Ok(())
    }
}
