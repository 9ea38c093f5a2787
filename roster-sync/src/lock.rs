//! Exclusive pass lock at `<home>/.roster/pass.lock`.
//!
//! Held for the whole of a pass so a `roster sync` and a daemon pass never
//! run against the same store at once. The lock is advisory and released
//! when the guard drops, including when the holding process dies.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use roster_core::store;

use crate::error::SyncError;

pub const PASS_LOCK: &str = "pass.lock";

/// `<home>/.roster/pass.lock`: pure, no I/O.
pub fn lock_path_at(home: &Path) -> PathBuf {
    store::roster_dir_at(home).join(PASS_LOCK)
}

/// Guard for the pass lock; dropping it releases the lock.
#[derive(Debug)]
pub struct PassLock {
    file: File,
    path: PathBuf,
}

impl PassLock {
    /// Take the lock without waiting.
    ///
    /// Returns [`SyncError::PassInProgress`] if another pass holds it.
    pub fn acquire(home: &Path) -> Result<Self, SyncError> {
        let path = lock_path_at(home);
        let lock_err = |source| SyncError::Lock {
            path: path.clone(),
            source,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(lock_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_err)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Self { file, path }),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                Err(SyncError::PassInProgress { path })
            }
            Err(err) => Err(lock_err(err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PassLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
