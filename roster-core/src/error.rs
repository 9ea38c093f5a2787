//! Error types for roster-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Cid, OperatingInitials};

/// A string that is not a valid pair of operating initials.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid operating initials '{0}': expected two letters")]
pub struct InitialsError(pub String);

/// All errors that can arise from local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (write/save path).
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON parse error on load, with the file path.
    #[error("failed to parse roster store at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The stored roster violates an initials invariant.
    #[error("roster store at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    #[error("controller {cid} already has an active record")]
    DuplicateCid { cid: Cid },

    #[error("operating initials {initials} are already held by controller {holder}")]
    InitialsInUse {
        initials: OperatingInitials,
        holder: Cid,
    },

    #[error("no active record for controller {cid}")]
    RecordNotFound { cid: Cid },
}

/// All errors that can arise from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, includes file path and line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config not found at {path}; run `roster init` first")]
    NotFound { path: PathBuf },

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
