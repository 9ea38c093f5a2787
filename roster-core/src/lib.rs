//! Roster core library: domain types, local store persistence, config, errors.
//!
//! - [`types`]: newtypes and domain structs
//! - [`error`]: [`StoreError`], [`ConfigError`]
//! - [`store`]: load / save / create / retire / update the local roster
//! - [`config`]: `~/.roster/config.yaml`

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{FeedConfig, RemovalPolicy, RosterConfig};
pub use error::{ConfigError, InitialsError, StoreError};
pub use store::RosterFile;
pub use types::{
    Cid, FieldChange, LocalRecord, Membership, OperatingInitials, RosterRecord,
};
