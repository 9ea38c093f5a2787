//! File-backed local roster.
//!
//! # Storage layout
//!
//! ```text
//! ~/.roster/
//!   roster.json       (mode 0600, created on first save)
//!   config.yaml
//! ```
//!
//! # API pattern
//!
//! Every path-taking function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Records are soft-deleted: retiring a controller keeps its row, sets the
//! deleted flag and timestamp, and releases its operating initials.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::types::{Cid, FieldChange, LocalRecord, OperatingInitials, RosterRecord};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.roster/`
pub fn roster_dir_at(home: &Path) -> PathBuf {
    home.join(".roster")
}

/// `<home>/.roster/roster.json`: pure, no I/O.
pub fn store_path_at(home: &Path) -> PathBuf {
    roster_dir_at(home).join("roster.json")
}

// ---------------------------------------------------------------------------
// 2. In-memory document
// ---------------------------------------------------------------------------

/// On-disk roster payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterFile {
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub records: Vec<LocalRecord>,
}

impl Default for RosterFile {
    fn default() -> Self {
        Self {
            updated_at: Utc::now(),
            records: Vec::new(),
        }
    }
}

impl RosterFile {
    /// Non-deleted records, sorted by cid.
    pub fn active_records(&self) -> Vec<LocalRecord> {
        let mut active: Vec<LocalRecord> = self
            .records
            .iter()
            .filter(|r| r.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|r| r.cid);
        active
    }

    pub fn find(&self, cid: Cid) -> Option<&LocalRecord> {
        self.records.iter().find(|r| r.cid == cid)
    }

    fn find_active_mut(&mut self, cid: Cid) -> Result<&mut LocalRecord, StoreError> {
        self.records
            .iter_mut()
            .find(|r| r.cid == cid && r.is_active())
            .ok_or(StoreError::RecordNotFound { cid })
    }

    fn initials_holder(&self, initials: &OperatingInitials) -> Option<Cid> {
        self.records
            .iter()
            .find(|r| r.is_active() && r.oi.as_ref() == Some(initials))
            .map(|r| r.cid)
    }

    /// Insert an active record for `record`, reviving a soft-deleted row for
    /// the same cid if one exists.
    pub fn create(
        &mut self,
        record: &RosterRecord,
        initials: OperatingInitials,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(holder) = self.initials_holder(&initials) {
            return Err(StoreError::InitialsInUse { initials, holder });
        }

        let fresh = LocalRecord::from_roster(record, initials, now);
        match self.records.iter().position(|r| r.cid == record.cid) {
            Some(i) if self.records[i].is_active() => {
                return Err(StoreError::DuplicateCid { cid: record.cid });
            }
            Some(i) => {
                let created_at = self.records[i].created_at;
                self.records[i] = LocalRecord { created_at, ..fresh };
            }
            None => self.records.push(fresh),
        }
        self.updated_at = now;
        Ok(())
    }

    /// Soft-delete `cid` and release its initials. Returns the released code.
    pub fn retire(
        &mut self,
        cid: Cid,
        now: DateTime<Utc>,
    ) -> Result<Option<OperatingInitials>, StoreError> {
        let record = self.find_active_mut(cid)?;
        record.deleted = true;
        record.deleted_at = Some(now);
        record.updated_at = now;
        let released = record.oi.take();
        self.updated_at = now;
        Ok(released)
    }

    /// Apply a single field change to an active record.
    pub fn update(
        &mut self,
        cid: Cid,
        change: &FieldChange,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.find_active_mut(cid)?.apply(change, now);
        self.updated_at = now;
        Ok(())
    }

    /// Check that active initials are unique and that `oi` is set exactly on
    /// active records. Returns the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen: HashMap<&OperatingInitials, Cid> = HashMap::new();
        for record in &self.records {
            match (&record.oi, record.is_active()) {
                (Some(oi), true) => {
                    if let Some(other) = seen.insert(oi, record.cid) {
                        return Err(format!(
                            "initials {oi} shared by controllers {other} and {}",
                            record.cid
                        ));
                    }
                }
                (None, true) => {
                    return Err(format!("active controller {} has no initials", record.cid));
                }
                (Some(oi), false) => {
                    return Err(format!(
                        "deleted controller {} still holds initials {oi}",
                        record.cid
                    ));
                }
                (None, false) => {}
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load the roster from `<home>/.roster/roster.json`.
///
/// Returns an empty roster if the file does not yet exist,
/// `StoreError::Parse` if malformed, `StoreError::Corrupt` if an invariant
/// does not hold.
pub fn load_at(home: &Path) -> Result<RosterFile, StoreError> {
    let path = store_path_at(home);
    if !path.exists() {
        return Ok(RosterFile::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let file: RosterFile = serde_json::from_str(&contents)
        .map_err(|e| StoreError::Parse { path: path.clone(), source: e })?;
    file.validate()
        .map_err(|reason| StoreError::Corrupt { path, reason })?;
    Ok(file)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<RosterFile, StoreError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 4. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the roster to `<home>/.roster/roster.json`.
///
/// Write flow: serialize → `.json.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, file: &RosterFile) -> Result<(), StoreError> {
    let dir = roster_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    let path = store_path_at(home);
    let tmp = path.with_extension("json.tmp");

    let json = serde_json::to_string_pretty(file)?;
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Membership;
    use tempfile::TempDir;

    fn roster(cid: u64, first: &str, last: &str) -> RosterRecord {
        RosterRecord {
            cid: Cid(cid),
            first_name: first.to_string(),
            last_name: last.to_string(),
            rating: 3,
            membership: Membership::Home,
            facility: "ZAB".to_string(),
            email: Some(format!("{cid}@example.com")),
            broadcast_opt_in: false,
            roles: vec![],
            name_privacy: false,
        }
    }

    fn oi(code: &str) -> OperatingInitials {
        OperatingInitials::new(code).expect("valid initials")
    }

    #[test]
    fn store_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        assert!(store_path_at(home.path()).ends_with(".roster/roster.json"));
    }

    #[test]
    fn missing_store_loads_empty() {
        let home = TempDir::new().expect("tempdir");
        let file = load_at(home.path()).expect("load");
        assert!(file.records.is_empty());
    }

    #[test]
    fn retire_releases_initials_and_keeps_history() {
        let now = Utc::now();
        let mut file = RosterFile::default();
        file.create(&roster(1, "Ryan", "Ace"), oi("RA"), now).expect("create");

        let released = file.retire(Cid(1), now).expect("retire");
        assert_eq!(released, Some(oi("RA")));

        let record = file.find(Cid(1)).expect("row kept");
        assert!(record.deleted);
        assert_eq!(record.deleted_at, Some(now));
        assert!(record.oi.is_none());
        assert!(file.active_records().is_empty());
        assert!(file.validate().is_ok());
    }

    #[test]
    fn create_rejects_held_initials() {
        let now = Utc::now();
        let mut file = RosterFile::default();
        file.create(&roster(1, "Ryan", "Ace"), oi("RA"), now).expect("create");
        let err = file
            .create(&roster(2, "Rita", "Adams"), oi("RA"), now)
            .unwrap_err();
        assert!(matches!(err, StoreError::InitialsInUse { holder: Cid(1), .. }));
    }

    #[test]
    fn create_rejects_active_duplicate_cid() {
        let now = Utc::now();
        let mut file = RosterFile::default();
        file.create(&roster(1, "Ryan", "Ace"), oi("RA"), now).expect("create");
        let err = file.create(&roster(1, "Ryan", "Ace"), oi("AR"), now).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCid { cid: Cid(1) }));
    }

    #[test]
    fn create_revives_soft_deleted_row() {
        let first = Utc::now() - chrono::Duration::days(30);
        let now = Utc::now();
        let mut file = RosterFile::default();
        file.create(&roster(1, "Ryan", "Ace"), oi("RA"), first).expect("create");
        file.retire(Cid(1), first).expect("retire");

        file.create(&roster(1, "Ryan", "Ace"), oi("AR"), now).expect("revive");
        assert_eq!(file.records.len(), 1);
        let record = &file.records[0];
        assert!(record.is_active());
        assert_eq!(record.oi, Some(oi("AR")));
        assert_eq!(record.created_at, first);
        assert!(record.deleted_at.is_none());
    }

    #[test]
    fn update_rejects_unknown_cid() {
        let mut file = RosterFile::default();
        let err = file
            .update(Cid(9), &FieldChange::Rating(5), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::RecordNotFound { cid: Cid(9) }));
    }

    #[test]
    fn save_and_load_roundtrip_with_perms() {
        let home = TempDir::new().expect("tempdir");
        let now = Utc::now();
        let mut file = RosterFile::default();
        file.create(&roster(7, "Ada", "Byron"), oi("AB"), now).expect("create");
        save_at(home.path(), &file).expect("save");

        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded.records, file.records);
        assert!(!store_path_at(home.path()).with_extension("json.tmp").exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(store_path_at(home.path()))
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(mode, 0o600);
        }
    }
}
