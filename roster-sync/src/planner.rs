//! Reconciliation planning.
//!
//! A [`Plan`] is an ordered operation list:
//!
//! 1. `CreateRecord` for every authoritative cid without a local record,
//!    ascending cid, initials allocated against the pass working set
//! 2. `RetireRecord` for every local cid missing upstream (ascending cid)
//! 3. `UpdateField` per differing field, ascending cid, fields in the order
//!    fname, lname, rating, member, vis, roles
//!
//! Creates come before retires, so initials released by a retirement are
//! only reused in a later pass.

use std::collections::HashSet;
use std::fmt;

use rand::Rng;
use serde::Serialize;

use roster_core::types::{
    same_roles, Cid, FieldChange, LocalRecord, OperatingInitials, RosterRecord,
};
use roster_core::RemovalPolicy;

use crate::diff::{diff, Keyed, RosterDiff, RosterIndex};
use crate::initials::{allocate, WorkingSet};

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// One change to apply to the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateRecord {
        record: RosterRecord,
        initials: OperatingInitials,
    },
    RetireRecord {
        cid: Cid,
    },
    UpdateField {
        cid: Cid,
        change: FieldChange,
    },
}

impl Operation {
    pub fn cid(&self) -> Cid {
        match self {
            Operation::CreateRecord { record, .. } => record.cid,
            Operation::RetireRecord { cid } | Operation::UpdateField { cid, .. } => *cid,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateRecord { record, initials } => write!(
                f,
                "create {} {} {} ({initials})",
                record.cid, record.first_name, record.last_name
            ),
            Operation::RetireRecord { cid } => write!(f, "retire {cid}"),
            Operation::UpdateField { cid, change } => write!(f, "update {cid} {change}"),
        }
    }
}

/// Why an authoritative controller got no `CreateRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AllocationExhausted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AllocationExhausted => write!(f, "no operating initials available"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub cid: Cid,
    pub name: String,
    pub reason: SkipReason,
}

/// The ordered operations for one pass plus the controllers left out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub operations: Vec<Operation>,
    pub skipped: Vec<SkippedRecord>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    pub removal: RemovalPolicy,
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// [`plan_with_rng`] with the thread-local generator.
pub fn plan(
    authoritative: &[RosterRecord],
    local: &[LocalRecord],
    options: &PlanOptions,
) -> Plan {
    plan_with_rng(authoritative, local, options, &mut rand::thread_rng())
}

/// Build the operation list that brings `local` in line with `authoritative`.
///
/// `local` is the set of active records; the working set starts as their
/// initials.
pub fn plan_with_rng<R: Rng>(
    authoritative: &[RosterRecord],
    local: &[LocalRecord],
    options: &PlanOptions,
    rng: &mut R,
) -> Plan {
    let upstream = RosterIndex::build(authoritative);
    let stored = RosterIndex::build(local);
    warn_duplicates("authoritative", &upstream);
    warn_duplicates("local", &stored);
    if upstream.is_empty() && !stored.is_empty() {
        tracing::warn!(
            "authoritative roster is empty; all {} local controllers are absent upstream",
            stored.len()
        );
    }
    let changes = diff(&upstream, &stored);
    let mut working = WorkingSet::from_records(local);
    let mut out = Plan::default();

    for cid in &changes.to_add {
        let Some(record) = upstream.get(*cid) else { continue };
        match allocate(&record.first_name, &record.last_name, &working, rng) {
            Some(initials) => {
                working.insert(initials.clone());
                out.operations.push(Operation::CreateRecord {
                    record: record.clone(),
                    initials,
                });
            }
            None => {
                tracing::warn!(
                    "couldn't generate operating initials for controller {} {} ({cid})",
                    record.first_name,
                    record.last_name
                );
                out.skipped.push(SkippedRecord {
                    cid: *cid,
                    name: format!("{} {}", record.first_name, record.last_name),
                    reason: SkipReason::AllocationExhausted,
                });
            }
        }
    }

    if options.removal == RemovalPolicy::Retire {
        out.operations.extend(
            changes
                .to_remove
                .iter()
                .map(|cid| Operation::RetireRecord { cid: *cid }),
        );
    }

    let transitions = Transitions::from_diff(&changes, options.removal);
    for cid in stored.cids() {
        let Some(record) = stored.get(cid) else { continue };
        for change in field_changes(record, upstream.get(cid), &transitions) {
            out.operations.push(Operation::UpdateField { cid, change });
        }
    }

    out
}

fn warn_duplicates<T: Keyed>(side: &str, index: &RosterIndex<'_, T>) {
    for cid in index.duplicates() {
        tracing::warn!("duplicate cid {cid} in {side} roster; keeping the first entry");
    }
}

/// Diff transition sets in O(1)-lookup form.
struct Transitions {
    make_member: HashSet<Cid>,
    make_non_member: HashSet<Cid>,
    make_visitor: HashSet<Cid>,
    make_home: HashSet<Cid>,
}

impl Transitions {
    fn from_diff(changes: &RosterDiff, removal: RemovalPolicy) -> Self {
        let make_non_member = match removal {
            RemovalPolicy::Demote => changes.make_non_member.iter().copied().collect(),
            RemovalPolicy::Retire => HashSet::new(),
        };
        Self {
            make_member: changes.make_member.iter().copied().collect(),
            make_non_member,
            make_visitor: changes.make_visitor.iter().copied().collect(),
            make_home: changes.make_home.iter().copied().collect(),
        }
    }
}

fn field_changes(
    local: &LocalRecord,
    upstream: Option<&RosterRecord>,
    transitions: &Transitions,
) -> Vec<FieldChange> {
    let mut out = Vec::new();
    let Some(upstream) = upstream else {
        if transitions.make_non_member.contains(&local.cid) {
            out.push(FieldChange::Member(false));
        }
        return out;
    };

    let (first_name, last_name) = upstream.display_name();
    if local.first_name != first_name {
        out.push(FieldChange::FirstName(first_name));
    }
    if local.last_name != last_name {
        out.push(FieldChange::LastName(last_name));
    }
    if local.rating != upstream.rating {
        out.push(FieldChange::Rating(upstream.rating));
    }
    if transitions.make_member.contains(&local.cid) {
        out.push(FieldChange::Member(true));
    }
    if transitions.make_visitor.contains(&local.cid) {
        out.push(FieldChange::Visiting(true));
    } else if transitions.make_home.contains(&local.cid) {
        out.push(FieldChange::Visiting(false));
    }
    if !same_roles(&local.roles, &upstream.roles) {
        out.push(FieldChange::Roles(upstream.roles.clone()));
    }
    out
}
