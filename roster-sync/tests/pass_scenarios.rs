//! End-to-end passes over a file feed and the file-backed store.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use roster_core::store;
use roster_core::types::{Cid, FieldChange};
use roster_core::RemovalPolicy;
use roster_sync::feed::FileFeed;
use roster_sync::initials::WorkingSet;
use roster_sync::planner::{plan_with_rng, Operation, PlanOptions};
use roster_sync::{run_pass, FileStore, RosterStore};
use serde_json::{json, Value};
use tempfile::TempDir;

fn controller(cid: u64, first: &str, last: &str) -> Value {
    json!({
        "cid": cid,
        "fname": first,
        "lname": last,
        "rating": 4,
        "membership": "home",
        "facility": "ZAB",
        "flag_broadcastOptedIn": true,
        "email": format!("{cid}@example.com"),
        "roles": [{ "role": "MTR" }]
    })
}

fn write_snapshot(dir: &Path, name: &str, records: &[Value]) -> FileFeed {
    let path: PathBuf = dir.join(name);
    std::fs::write(&path, json!({ "data": records, "testing": false }).to_string())
        .expect("write feed");
    FileFeed::new(path)
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pass(feed: &FileFeed, store: &mut FileStore, options: &PlanOptions) -> roster_sync::PassSummary {
    init_logging();
    run_pass(feed, store, options, &mut StdRng::seed_from_u64(7), false).expect("pass")
}

#[test]
fn new_controller_is_created_and_missing_one_retired() {
    let home = TempDir::new().expect("home");
    let seed = write_snapshot(home.path(), "seed.json", &[controller(2, "Kim", "Lee"), controller(3, "Old", "Timer")]);
    let mut store = FileStore::open(home.path());
    pass(&seed, &mut store, &PlanOptions::default());

    let feed = write_snapshot(home.path(), "feed.json", &[controller(1, "Ryan", "Ace"), controller(2, "Kim", "Lee")]);
    let plan = roster_sync::coordinator::plan_pass(
        &feed,
        &mut FileStore::open(home.path()),
        &PlanOptions::default(),
        &mut StdRng::seed_from_u64(7),
    )
    .expect("plan");

    assert_eq!(plan.operations.len(), 2, "got {:?}", plan.operations);
    assert!(matches!(
        &plan.operations[0],
        Operation::CreateRecord { record, .. } if record.cid == Cid(1)
    ));
    assert_eq!(plan.operations[1], Operation::RetireRecord { cid: Cid(3) });
}

#[test]
fn retired_initials_are_free_on_the_next_pass() {
    let home = TempDir::new().expect("home");
    let first = write_snapshot(home.path(), "first.json", &[controller(1, "Ryan", "Ace")]);
    let mut store = FileStore::open(home.path());
    pass(&first, &mut store, &PlanOptions::default());

    let emptied = write_snapshot(home.path(), "emptied.json", &[]);
    let summary = pass(&emptied, &mut store, &PlanOptions::default());
    assert_eq!(summary.removed, vec![Cid(1)]);

    let reloaded = store::load_at(home.path()).expect("load");
    let working = WorkingSet::from_records(&reloaded.records);
    assert!(working.is_empty());

    let returning = write_snapshot(home.path(), "returning.json", &[controller(4, "Rita", "Adams")]);
    let summary = pass(&returning, &mut FileStore::open(home.path()), &PlanOptions::default());
    assert_eq!(summary.added[0].initials.as_str(), "RA");
}

#[test]
fn returning_non_member_gets_a_single_member_update() {
    let home = TempDir::new().expect("home");
    let options = PlanOptions { removal: RemovalPolicy::Demote };
    let present = write_snapshot(home.path(), "present.json", &[controller(5, "Ada", "Byron")]);
    let absent = write_snapshot(home.path(), "absent.json", &[]);
    let mut store = FileStore::open(home.path());

    pass(&present, &mut store, &options);
    let summary = pass(&absent, &mut store, &options);
    assert_eq!(summary.updated.len(), 1);
    assert_eq!(summary.updated[0].change, FieldChange::Member(false));

    let local = store.active_records().expect("records");
    let plan = plan_with_rng(
        &present_records(&present),
        &local,
        &options,
        &mut StdRng::seed_from_u64(1),
    );
    assert_eq!(
        plan.operations,
        vec![Operation::UpdateField { cid: Cid(5), change: FieldChange::Member(true) }]
    );
}

#[test]
fn stored_rows_use_short_field_names() {
    let home = TempDir::new().expect("home");
    let feed = write_snapshot(home.path(), "feed.json", &[controller(8, "Nia", "Long")]);
    pass(&feed, &mut FileStore::open(home.path()), &PlanOptions::default());

    let raw: Value = serde_json::from_str(
        &std::fs::read_to_string(store::store_path_at(home.path())).expect("read store"),
    )
    .expect("json");
    let row = &raw["records"][0];
    assert_eq!(row["fname"], "Nia");
    assert_eq!(row["oi"], "NL");
    assert_eq!(row["broadcast"], true);
    assert_eq!(row["vis"], false);
    assert_eq!(row["roles"], json!(["MTR"]));
}

fn present_records(feed: &FileFeed) -> Vec<roster_core::RosterRecord> {
    use roster_sync::RosterFeed;
    feed.fetch().expect("fetch")
}
