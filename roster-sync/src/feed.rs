//! Authoritative roster feed clients.
//!
//! Accepted payload shapes:
//!
//! ```text
//! [ {record}, ... ]                         plain array
//! { "data": [ {record}, ... ], ... }        wrapped array
//! { "0": {record}, "1": {record}, "testing": false }   keyed object
//! ```
//!
//! In the keyed form, non-object values (such as `testing`) are ignored.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use roster_core::types::RosterRecord;
use roster_core::FeedConfig;

use crate::coordinator::RosterFeed;
use crate::error::{feed_io_err, FeedError};

/// GETs the roster over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFeed {
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpFeed {
    pub fn new(url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            api_key,
            timeout,
        }
    }
}

impl RosterFeed for HttpFeed {
    fn fetch(&self) -> Result<Vec<RosterRecord>, FeedError> {
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let mut request = agent.get(&self.url).set("Accept", "application/json");
        if let Some(key) = self.api_key.as_deref() {
            request = request.set("Authorization", &format!("Basic {key}"));
        }

        tracing::debug!("fetching roster from {}", self.url);
        let response = request.call().map_err(|e| FeedError::Http {
            url: self.url.clone(),
            source: Box::new(e),
        })?;
        let payload: Value = response.into_json().map_err(|e| FeedError::Io {
            location: self.url.clone(),
            source: e,
        })?;
        parse_payload(payload, &self.url)
    }
}

/// Reads a roster snapshot from a local JSON file.
#[derive(Debug, Clone)]
pub struct FileFeed {
    path: PathBuf,
}

impl FileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RosterFeed for FileFeed {
    fn fetch(&self) -> Result<Vec<RosterRecord>, FeedError> {
        let location = self.path.display().to_string();
        let contents = std::fs::read_to_string(&self.path).map_err(|e| feed_io_err(&self.path, e))?;
        let payload: Value = serde_json::from_str(&contents).map_err(|e| FeedError::Malformed {
            location: location.clone(),
            reason: e.to_string(),
        })?;
        parse_payload(payload, &location)
    }
}

/// The feed named by a [`FeedConfig`] url.
#[derive(Debug, Clone)]
pub enum ConfiguredFeed {
    Http(HttpFeed),
    File(FileFeed),
}

impl ConfiguredFeed {
    /// `http://` / `https://` → [`HttpFeed`]; `file://` or a bare path →
    /// [`FileFeed`].
    pub fn from_config(config: &FeedConfig) -> Self {
        let url = config.url.trim();
        if url.starts_with("http://") || url.starts_with("https://") {
            ConfiguredFeed::Http(HttpFeed::new(
                url,
                config.api_key.clone(),
                Duration::from_secs(config.timeout_secs),
            ))
        } else {
            let path = url.strip_prefix("file://").unwrap_or(url);
            ConfiguredFeed::File(FileFeed::new(path))
        }
    }
}

impl RosterFeed for ConfiguredFeed {
    fn fetch(&self) -> Result<Vec<RosterRecord>, FeedError> {
        match self {
            ConfiguredFeed::Http(feed) => feed.fetch(),
            ConfiguredFeed::File(feed) => feed.fetch(),
        }
    }
}

/// Decode any accepted payload shape into roster records.
pub fn parse_payload(payload: Value, location: &str) -> Result<Vec<RosterRecord>, FeedError> {
    let malformed = |reason: String| FeedError::Malformed {
        location: location.to_string(),
        reason,
    };

    let entries: Vec<Value> = match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(malformed(format!(
                    "expected `data` to be an array, found {}",
                    kind(&other)
                )))
            }
            None => map.into_iter().map(|(_, v)| v).filter(Value::is_object).collect(),
        },
        other => {
            return Err(malformed(format!(
                "expected an array or object, found {}",
                kind(&other)
            )))
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            serde_json::from_value::<RosterRecord>(entry)
                .map_err(|e| malformed(format!("record {i}: {e}")))
        })
        .collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
