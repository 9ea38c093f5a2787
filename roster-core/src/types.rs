//! Domain types for roster reconciliation.
//!
//! Authoritative records ([`RosterRecord`]) arrive from the external feed and
//! are immutable for one pass. Local records ([`LocalRecord`]) are the stored
//! projection and are soft-deleted, never removed.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::InitialsError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Controller identifier; the natural key shared by both rosters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(pub u64);

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for Cid {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Two-letter operating initials, always uppercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperatingInitials(String);

impl OperatingInitials {
    /// Normalise `code` to uppercase; `None` unless it is exactly two letters.
    pub fn new(code: &str) -> Option<Self> {
        let upper: String = code.chars().flat_map(char::to_uppercase).collect();
        let mut chars = upper.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(a), Some(b), None) if a.is_alphabetic() && b.is_alphabetic() => {
                Some(Self(upper))
            }
            _ => None,
        }
    }

    /// Build from two already-uppercased letters.
    pub fn from_pair(first: char, second: char) -> Option<Self> {
        let mut code = String::with_capacity(2);
        code.push(first);
        code.push(second);
        Self::new(&code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperatingInitials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OperatingInitials {
    type Err = InitialsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or_else(|| InitialsError(s.to_owned()))
    }
}

impl TryFrom<String> for OperatingInitials {
    type Error = InitialsError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<OperatingInitials> for String {
    fn from(oi: OperatingInitials) -> Self {
        oi.0
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Membership classification reported by the authoritative feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Membership {
    Home,
    Visiting,
    Other(String),
}

impl From<String> for Membership {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "home" => Membership::Home,
            "visit" | "visiting" | "visitor" => Membership::Visiting,
            _ => Membership::Other(s),
        }
    }
}

impl From<Membership> for String {
    fn from(m: Membership) -> Self {
        m.to_string()
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Membership::Home => write!(f, "home"),
            Membership::Visiting => write!(f, "visiting"),
            Membership::Other(s) => write!(f, "{s}"),
        }
    }
}

/// A single typed field update for a local record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldChange {
    FirstName(String),
    LastName(String),
    Rating(i32),
    Member(bool),
    Visiting(bool),
    Roles(Vec<String>),
}

impl FieldChange {
    /// Stable label of the stored field this change targets.
    pub fn field_name(&self) -> &'static str {
        match self {
            FieldChange::FirstName(_) => "fname",
            FieldChange::LastName(_) => "lname",
            FieldChange::Rating(_) => "rating",
            FieldChange::Member(_) => "member",
            FieldChange::Visiting(_) => "vis",
            FieldChange::Roles(_) => "roles",
        }
    }
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldChange::FirstName(v) | FieldChange::LastName(v) => {
                write!(f, "{}={v}", self.field_name())
            }
            FieldChange::Rating(v) => write!(f, "rating={v}"),
            FieldChange::Member(v) => write!(f, "member={v}"),
            FieldChange::Visiting(v) => write!(f, "vis={v}"),
            FieldChange::Roles(v) => write!(f, "roles=[{}]", v.join(",")),
        }
    }
}

// ---------------------------------------------------------------------------
// Authoritative record
// ---------------------------------------------------------------------------

/// First and last name substituted for controllers who opted into name privacy.
pub const PRIVATE_FIRST_NAME: &str = "Controller";

/// One controller as reported by the authoritative roster feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterRecord {
    pub cid: Cid,
    #[serde(alias = "fname")]
    pub first_name: String,
    #[serde(alias = "lname")]
    pub last_name: String,
    pub rating: i32,
    #[serde(default = "default_membership")]
    pub membership: Membership,
    #[serde(default)]
    pub facility: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "flag_broadcastOptedIn", deserialize_with = "flag")]
    pub broadcast_opt_in: bool,
    #[serde(default, deserialize_with = "role_codes")]
    pub roles: Vec<String>,
    #[serde(default, alias = "flag_nameprivacy", deserialize_with = "flag")]
    pub name_privacy: bool,
}

fn default_membership() -> Membership {
    Membership::Home
}

impl RosterRecord {
    /// Names to store locally. Private controllers are stored as
    /// `Controller <cid>`.
    pub fn display_name(&self) -> (String, String) {
        if self.name_privacy {
            (PRIVATE_FIRST_NAME.to_owned(), self.cid.to_string())
        } else {
            (self.first_name.clone(), self.last_name.clone())
        }
    }

    pub fn is_visiting(&self) -> bool {
        self.membership == Membership::Visiting
    }
}

/// Feed flags arrive as booleans, 0/1 integers or `null`.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Null(()),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
        Flag::Null(()) => false,
    })
}

/// Roles arrive either as plain codes or as role objects carrying a `role` key.
fn role_codes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Role {
        Code(String),
        Object { role: String },
    }

    let roles = Option::<Vec<Role>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(roles
        .into_iter()
        .map(|r| match r {
            Role::Code(code) | Role::Object { role: code } => code,
        })
        .collect())
}

/// Compare two role lists ignoring order and duplicates.
pub fn same_roles(a: &[String], b: &[String]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

// ---------------------------------------------------------------------------
// Local record
// ---------------------------------------------------------------------------

/// The stored projection of a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub cid: Cid,
    #[serde(rename = "fname")]
    pub first_name: String,
    #[serde(rename = "lname")]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub rating: i32,
    #[serde(default)]
    pub oi: Option<OperatingInitials>,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default, rename = "vis")]
    pub visiting: bool,
    #[serde(default = "default_member")]
    pub member: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_member() -> bool {
    true
}

impl LocalRecord {
    /// Build a fresh active record for an authoritative controller.
    pub fn from_roster(
        record: &RosterRecord,
        initials: OperatingInitials,
        now: DateTime<Utc>,
    ) -> Self {
        let (first_name, last_name) = record.display_name();
        Self {
            cid: record.cid,
            first_name,
            last_name,
            email: record.email.clone(),
            rating: record.rating,
            oi: Some(initials),
            broadcast: record.broadcast_opt_in,
            visiting: record.is_visiting(),
            member: true,
            roles: record.roles.clone(),
            deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Apply one field change in place and bump `updated_at`.
    pub fn apply(&mut self, change: &FieldChange, now: DateTime<Utc>) {
        match change {
            FieldChange::FirstName(v) => self.first_name = v.clone(),
            FieldChange::LastName(v) => self.last_name = v.clone(),
            FieldChange::Rating(v) => self.rating = *v,
            FieldChange::Member(v) => self.member = *v,
            FieldChange::Visiting(v) => self.visiting = *v,
            FieldChange::Roles(v) => self.roles = v.clone(),
        }
        self.updated_at = now;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
