//! One reconciliation pass: fetch both snapshots, plan, execute.
//!
//! A pass aborts before planning if either snapshot is unavailable.
//! Once planning succeeds, operations run one at a time in plan order and a
//! failed operation is recorded in the summary without stopping the pass.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

use roster_core::error::StoreError;
use roster_core::types::{Cid, FieldChange, LocalRecord, OperatingInitials, RosterRecord};

use crate::error::{FeedError, SyncError};
use crate::planner::{plan_with_rng, Operation, Plan, PlanOptions, SkippedRecord};

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

/// Source of the authoritative roster snapshot.
pub trait RosterFeed {
    fn fetch(&self) -> Result<Vec<RosterRecord>, FeedError>;
}

/// Backing store for local records.
pub trait RosterStore {
    /// Active (non-deleted) records.
    fn active_records(&mut self) -> Result<Vec<LocalRecord>, StoreError>;

    /// Apply and commit a single operation.
    fn execute(&mut self, operation: &Operation) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddedRecord {
    pub cid: Cid,
    pub name: String,
    pub initials: OperatingInitials,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdatedField {
    pub cid: Cid,
    pub change: FieldChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedOperation {
    pub operation: Operation,
    pub error: String,
}

/// Outcome of one pass. In a dry run the lists describe what would have been
/// applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub added: Vec<AddedRecord>,
    pub removed: Vec<Cid>,
    pub updated: Vec<UpdatedField>,
    pub skipped: Vec<SkippedRecord>,
    pub failed: Vec<FailedOperation>,
}

impl PassSummary {
    fn new(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            dry_run,
            added: Vec::new(),
            removed: Vec::new(),
            updated: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    fn record_success(&mut self, operation: &Operation) {
        match operation {
            Operation::CreateRecord { record, initials } => self.added.push(AddedRecord {
                cid: record.cid,
                name: format!("{} {}", record.first_name, record.last_name),
                initials: initials.clone(),
            }),
            Operation::RetireRecord { cid } => self.removed.push(*cid),
            Operation::UpdateField { cid, change } => self.updated.push(UpdatedField {
                cid: *cid,
                change: change.clone(),
            }),
        }
    }

    /// Whether the pass changed (or would change) nothing.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.updated.is_empty()
            && self.skipped.is_empty()
            && self.failed.is_empty()
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.dry_run { "[dry-run] " } else { "" };
        writeln!(
            f,
            "{prefix}{} added, {} removed, {} updated, {} skipped, {} failed",
            self.added.len(),
            self.removed.len(),
            self.updated.len(),
            self.skipped.len(),
            self.failed.len()
        )?;
        for added in &self.added {
            writeln!(f, "  + {} {} ({})", added.cid, added.name, added.initials)?;
        }
        for cid in &self.removed {
            writeln!(f, "  - {cid}")?;
        }
        for updated in &self.updated {
            writeln!(f, "  ~ {} {}", updated.cid, updated.change)?;
        }
        for skipped in &self.skipped {
            writeln!(f, "  ! {} {}: {}", skipped.cid, skipped.name, skipped.reason)?;
        }
        for failed in &self.failed {
            writeln!(f, "  x {}: {}", failed.operation, failed.error)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pass
// ---------------------------------------------------------------------------

/// Fetch both snapshots and plan, without executing anything.
///
/// The authoritative feed is fetched first; if it fails the store is never
/// touched.
pub fn plan_pass<F, S, R>(
    feed: &F,
    store: &mut S,
    options: &PlanOptions,
    rng: &mut R,
) -> Result<Plan, SyncError>
where
    F: RosterFeed + ?Sized,
    S: RosterStore + ?Sized,
    R: Rng,
{
    let authoritative = feed.fetch()?;
    let local = store.active_records().map_err(SyncError::LocalSnapshot)?;
    tracing::info!(
        "fetched {} authoritative and {} local controllers",
        authoritative.len(),
        local.len()
    );
    Ok(plan_with_rng(&authoritative, &local, options, rng))
}

/// Run one reconciliation pass.
///
/// Returns `Err` only when a snapshot could not be fetched. Individual
/// operation failures are collected in [`PassSummary::failed`].
pub fn run_pass<F, S, R>(
    feed: &F,
    store: &mut S,
    options: &PlanOptions,
    rng: &mut R,
    dry_run: bool,
) -> Result<PassSummary, SyncError>
where
    F: RosterFeed + ?Sized,
    S: RosterStore + ?Sized,
    R: Rng,
{
    let started_at = Utc::now();
    let plan = plan_pass(feed, store, options, rng)?;
    let summary = execute_plan(store, plan, started_at, dry_run);
    tracing::info!(
        "{}roster pass done: {} added, {} removed, {} updated, {} skipped, {} failed",
        if dry_run { "[dry-run] " } else { "" },
        summary.added.len(),
        summary.removed.len(),
        summary.updated.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    Ok(summary)
}

fn execute_plan<S>(
    store: &mut S,
    plan: Plan,
    started_at: DateTime<Utc>,
    dry_run: bool,
) -> PassSummary
where
    S: RosterStore + ?Sized,
{
    let mut summary = PassSummary::new(started_at, dry_run);
    summary.skipped = plan.skipped;

    for operation in plan.operations {
        if dry_run {
            tracing::info!("[dry-run] would {operation}");
            summary.record_success(&operation);
            continue;
        }
        match store.execute(&operation) {
            Ok(()) => {
                tracing::info!("{operation}");
                summary.record_success(&operation);
            }
            Err(err) => {
                tracing::warn!("operation failed: {operation}: {err}");
                summary.failed.push(FailedOperation {
                    operation,
                    error: err.to_string(),
                });
            }
        }
    }

    summary.finished_at = Utc::now();
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use roster_core::types::Membership;
    use roster_core::RosterFile;

    struct StaticFeed(Result<Vec<RosterRecord>, String>);

    impl RosterFeed for StaticFeed {
        fn fetch(&self) -> Result<Vec<RosterRecord>, FeedError> {
            self.0.clone().map_err(|reason| FeedError::Malformed {
                location: "static".into(),
                reason,
            })
        }
    }

    /// In-memory store that can be told to reject specific cids.
    #[derive(Default)]
    struct MemoryStore {
        file: RosterFile,
        reject: Vec<Cid>,
        touched: bool,
    }

    impl RosterStore for MemoryStore {
        fn active_records(&mut self) -> Result<Vec<LocalRecord>, StoreError> {
            self.touched = true;
            Ok(self.file.active_records())
        }

        fn execute(&mut self, operation: &Operation) -> Result<(), StoreError> {
            self.touched = true;
            let cid = operation.cid();
            if self.reject.contains(&cid) {
                return Err(StoreError::RecordNotFound { cid });
            }
            let now = Utc::now();
            match operation {
                Operation::CreateRecord { record, initials } => {
                    self.file.create(record, initials.clone(), now)
                }
                Operation::RetireRecord { cid } => self.file.retire(*cid, now).map(|_| ()),
                Operation::UpdateField { cid, change } => self.file.update(*cid, change, now),
            }
        }
    }

    fn upstream(cid: u64, first: &str, last: &str) -> RosterRecord {
        RosterRecord {
            cid: Cid(cid),
            first_name: first.into(),
            last_name: last.into(),
            rating: 3,
            membership: Membership::Home,
            facility: "ZAB".into(),
            email: None,
            broadcast_opt_in: false,
            roles: vec![],
            name_privacy: false,
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(11)
    }

    #[test]
    fn feed_failure_aborts_before_touching_store() {
        let feed = StaticFeed(Err("boom".into()));
        let mut store = MemoryStore::default();
        let err = run_pass(&feed, &mut store, &PlanOptions::default(), &mut rng(), false)
            .unwrap_err();
        assert!(err.is_fetch_failure());
        assert!(!store.touched);
    }

    #[test]
    fn failed_operation_does_not_stop_the_pass() {
        let feed = StaticFeed(Ok(vec![
            upstream(1, "Ryan", "Ace"),
            upstream(2, "Kim", "Lee"),
            upstream(3, "Ada", "Byron"),
        ]));
        let mut store = MemoryStore {
            reject: vec![Cid(2)],
            ..MemoryStore::default()
        };

        let summary =
            run_pass(&feed, &mut store, &PlanOptions::default(), &mut rng(), false).expect("pass");
        assert_eq!(summary.added.len(), 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].operation.cid(), Cid(2));
        assert_eq!(store.file.active_records().len(), 2);
    }

    #[test]
    fn second_pass_retries_failed_create_and_converges() {
        let feed = StaticFeed(Ok(vec![upstream(1, "Ryan", "Ace"), upstream(2, "Kim", "Lee")]));
        let mut store = MemoryStore {
            reject: vec![Cid(2)],
            ..MemoryStore::default()
        };
        run_pass(&feed, &mut store, &PlanOptions::default(), &mut rng(), false).expect("first");

        store.reject.clear();
        let second =
            run_pass(&feed, &mut store, &PlanOptions::default(), &mut rng(), false).expect("second");
        assert_eq!(second.added.len(), 1);
        assert_eq!(second.added[0].cid, Cid(2));

        let third =
            run_pass(&feed, &mut store, &PlanOptions::default(), &mut rng(), false).expect("third");
        assert!(third.is_noop(), "converged roster should plan nothing: {third}");
    }

    #[test]
    fn dry_run_reports_without_executing() {
        let feed = StaticFeed(Ok(vec![upstream(1, "Ryan", "Ace")]));
        let mut store = MemoryStore::default();
        let summary =
            run_pass(&feed, &mut store, &PlanOptions::default(), &mut rng(), true).expect("pass");
        assert!(summary.dry_run);
        assert_eq!(summary.added.len(), 1);
        assert!(store.file.records.is_empty());
        assert!(summary.to_string().starts_with("[dry-run] 1 added"));
    }

    #[test]
    fn exhausted_initials_show_up_as_skipped() {
        let letters: Vec<char> = ('A'..='Z').collect();
        let mut file = RosterFile::default();
        let mut roster = Vec::new();
        for a in &letters {
            for b in &letters {
                if (*a, *b) == ('Z', 'Z') {
                    continue;
                }
                let holder = upstream(1000 + roster.len() as u64, "Local", "Holder");
                let code = OperatingInitials::from_pair(*a, *b).expect("pair");
                file.create(&holder, code, Utc::now()).expect("seed holder");
                roster.push(holder);
            }
        }
        roster.push(upstream(1, "Zed", "Zane"));
        roster.push(upstream(2, "Ryan", "Ace"));
        let mut store = MemoryStore {
            file,
            ..MemoryStore::default()
        };

        let summary = run_pass(
            &StaticFeed(Ok(roster)),
            &mut store,
            &PlanOptions::default(),
            &mut rng(),
            false,
        )
        .expect("pass");
        assert_eq!(summary.added.len(), 1);
        assert_eq!(summary.skipped.len(), 1);
        assert!(summary.failed.is_empty());
        assert!(store.file.find(Cid(2)).is_none());

        let text = summary.to_string();
        assert!(text.contains("1 added, 0 removed, 0 updated, 1 skipped, 0 failed"), "{text}");
        assert!(text.contains("  + 1 Zed Zane (ZZ)"), "{text}");
        assert!(text.contains("  ! 2 Ryan Ace: no operating initials available"), "{text}");
    }

    #[test]
    fn summary_lists_identifiers() {
        let feed = StaticFeed(Ok(vec![upstream(1, "Ryan", "Ace")]));
        let mut store = MemoryStore::default();
        let summary =
            run_pass(&feed, &mut store, &PlanOptions::default(), &mut rng(), false).expect("pass");
        let text = summary.to_string();
        assert!(text.contains("1 added, 0 removed, 0 updated, 0 skipped, 0 failed"));
        assert!(text.contains("+ 1 Ryan Ace (RA)"));
    }
}
