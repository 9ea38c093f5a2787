//! # roster-sync
//!
//! Roster reconciliation: diff the authoritative roster against the local
//! store, plan the operations that converge them, and execute a pass.
//!
//! Call [`pipeline::run`] to run one pass for a configured facility, or
//! [`coordinator::run_pass`] with your own [`RosterFeed`] / [`RosterStore`].

pub mod coordinator;
pub mod diff;
pub mod error;
pub mod feed;
pub mod initials;
pub mod lock;
pub mod pipeline;
pub mod planner;

pub use coordinator::{run_pass, PassSummary, RosterFeed, RosterStore};
pub use error::{FeedError, SyncError};
pub use feed::ConfiguredFeed;
pub use lock::PassLock;
pub use pipeline::FileStore;
pub use planner::{plan, Operation, Plan, PlanOptions};
