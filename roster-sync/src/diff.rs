//! Set difference between the authoritative and local rosters.
//!
//! Membership in `to_add` / `to_remove` is decided on cid equality alone.
//! The transition sets look at the flags of records present on each side.
//! Every set is returned sorted by cid so plans built from it are stable.

use std::collections::{HashMap, HashSet};

use roster_core::types::{Cid, LocalRecord, Membership, RosterRecord};

/// Records addressable by controller id.
pub trait Keyed {
    fn cid(&self) -> Cid;
}

impl Keyed for RosterRecord {
    fn cid(&self) -> Cid {
        self.cid
    }
}

impl Keyed for LocalRecord {
    fn cid(&self) -> Cid {
        self.cid
    }
}

// ---------------------------------------------------------------------------
// RosterIndex
// ---------------------------------------------------------------------------

/// cid → record lookup over one snapshot. The first record seen for a cid
/// wins; later duplicates are recorded in [`RosterIndex::duplicates`].
#[derive(Debug)]
pub struct RosterIndex<'a, T> {
    by_cid: HashMap<Cid, &'a T>,
    duplicates: Vec<Cid>,
}

impl<'a, T: Keyed> RosterIndex<'a, T> {
    pub fn build(records: &'a [T]) -> Self {
        let mut by_cid = HashMap::with_capacity(records.len());
        let mut duplicates = Vec::new();
        for record in records {
            let cid = record.cid();
            if by_cid.contains_key(&cid) {
                duplicates.push(cid);
                continue;
            }
            by_cid.insert(cid, record);
        }
        Self { by_cid, duplicates }
    }

    pub fn get(&self, cid: Cid) -> Option<&'a T> {
        self.by_cid.get(&cid).copied()
    }

    pub fn contains(&self, cid: Cid) -> bool {
        self.by_cid.contains_key(&cid)
    }

    /// All cids, ascending.
    pub fn cids(&self) -> Vec<Cid> {
        let mut cids: Vec<Cid> = self.by_cid.keys().copied().collect();
        cids.sort_unstable();
        cids
    }

    /// Cids that appeared more than once, in encounter order.
    pub fn duplicates(&self) -> &[Cid] {
        &self.duplicates
    }

    pub fn len(&self) -> usize {
        self.by_cid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_cid.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Membership and classification differences between the two rosters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDiff {
    /// Authoritative cids with no local record.
    pub to_add: Vec<Cid>,
    /// Local cids missing from the authoritative roster.
    pub to_remove: Vec<Cid>,
    /// Local non-members that are back on the authoritative roster.
    pub make_member: Vec<Cid>,
    /// Local members missing from the authoritative roster.
    pub make_non_member: Vec<Cid>,
    /// Local home controllers now classified visiting.
    pub make_visitor: Vec<Cid>,
    /// Local visitors now classified home.
    pub make_home: Vec<Cid>,
}

impl RosterDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty()
            && self.to_remove.is_empty()
            && self.make_member.is_empty()
            && self.make_non_member.is_empty()
            && self.make_visitor.is_empty()
            && self.make_home.is_empty()
    }
}

/// `(to_add, to_remove)` over bare cid sets, both ascending.
pub fn diff_cids(authoritative: &HashSet<Cid>, local: &HashSet<Cid>) -> (Vec<Cid>, Vec<Cid>) {
    let mut to_add: Vec<Cid> = authoritative.difference(local).copied().collect();
    let mut to_remove: Vec<Cid> = local.difference(authoritative).copied().collect();
    to_add.sort_unstable();
    to_remove.sort_unstable();
    (to_add, to_remove)
}

/// Compute every difference set between the two indexed snapshots.
pub fn diff(
    authoritative: &RosterIndex<'_, RosterRecord>,
    local: &RosterIndex<'_, LocalRecord>,
) -> RosterDiff {
    let mut out = RosterDiff::default();

    for cid in authoritative.cids() {
        if !local.contains(cid) {
            out.to_add.push(cid);
        }
    }

    for cid in local.cids() {
        let Some(record) = local.get(cid) else { continue };
        match authoritative.get(cid) {
            None => {
                out.to_remove.push(cid);
                if record.member {
                    out.make_non_member.push(cid);
                }
            }
            Some(upstream) => {
                if !record.member {
                    out.make_member.push(cid);
                }
                match upstream.membership {
                    Membership::Visiting if !record.visiting => out.make_visitor.push(cid),
                    Membership::Home if record.visiting => out.make_home.push(cid),
                    _ => {}
                }
            }
        }
    }

    out
}
