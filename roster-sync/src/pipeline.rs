//! Shared pass entrypoint used by CLI and daemon.

use std::path::{Path, PathBuf};

use chrono::Utc;

use roster_core::error::StoreError;
use roster_core::store::{self, RosterFile};
use roster_core::types::LocalRecord;
use roster_core::RosterConfig;

use crate::coordinator::{plan_pass, run_pass, PassSummary, RosterStore};
use crate::error::SyncError;
use crate::feed::ConfiguredFeed;
use crate::lock::PassLock;
use crate::planner::{Operation, Plan, PlanOptions};

/// [`RosterStore`] over `<home>/.roster/roster.json`.
///
/// The file is read on first use. Each executed operation is saved before
/// the next one runs, so an interrupted pass keeps its completed operations.
#[derive(Debug)]
pub struct FileStore {
    home: PathBuf,
    file: Option<RosterFile>,
}

impl FileStore {
    pub fn open(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            file: None,
        }
    }

    fn loaded(&mut self) -> Result<&mut RosterFile, StoreError> {
        let file = match self.file.take() {
            Some(file) => file,
            None => store::load_at(&self.home)?,
        };
        Ok(self.file.insert(file))
    }
}

impl RosterStore for FileStore {
    fn active_records(&mut self) -> Result<Vec<LocalRecord>, StoreError> {
        Ok(self.loaded()?.active_records())
    }

    fn execute(&mut self, operation: &Operation) -> Result<(), StoreError> {
        let home = self.home.clone();
        let current = self.loaded()?;
        let mut next = current.clone();
        let now = Utc::now();
        match operation {
            Operation::CreateRecord { record, initials } => {
                next.create(record, initials.clone(), now)?
            }
            Operation::RetireRecord { cid } => {
                next.retire(*cid, now)?;
            }
            Operation::UpdateField { cid, change } => next.update(*cid, change, now)?,
        }
        store::save_at(&home, &next)?;
        *current = next;
        Ok(())
    }
}

fn options(config: &RosterConfig) -> PlanOptions {
    PlanOptions {
        removal: config.removal,
    }
}

/// Run one pass for the configured facility against the store under `home`.
///
/// This is the canonical pass entrypoint for both `roster sync` and the
/// daemon processor. The pass lock is held until the pass returns; if
/// another process holds it this fails with [`SyncError::PassInProgress`]
/// before fetching anything.
pub fn run(home: &Path, config: &RosterConfig, dry_run: bool) -> Result<PassSummary, SyncError> {
    let _lock = PassLock::acquire(home)?;
    let feed = ConfiguredFeed::from_config(&config.feed);
    let mut store = FileStore::open(home);
    run_pass(
        &feed,
        &mut store,
        &options(config),
        &mut rand::thread_rng(),
        dry_run,
    )
}

/// Plan a pass without executing it.
///
/// Takes no lock: saves are atomic renames, so a concurrent pass is seen
/// either before or after each operation.
pub fn preview(home: &Path, config: &RosterConfig) -> Result<Plan, SyncError> {
    let feed = ConfiguredFeed::from_config(&config.feed);
    let mut store = FileStore::open(home);
    plan_pass(&feed, &mut store, &options(config), &mut rand::thread_rng())
}
