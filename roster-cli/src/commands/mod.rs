pub mod daemon;
pub mod init;
pub mod plan;
pub mod status;
pub mod sync;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use roster_core::{config, RosterConfig};

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Load the config, pointing the feed at `feed` when given.
pub(crate) fn load_config(home: &Path, feed: Option<String>) -> Result<RosterConfig> {
    let mut config = config::load_at(home).context("failed to load roster config")?;
    if let Some(url) = feed {
        config.feed.url = url;
    }
    Ok(config)
}
