//! Error types for the MergeGraph core.
//!
//! Hub resolution outcomes (not found, gated, malformed id) are modelled as
//! distinct variants so the indexing job can degrade them to stub records
//! instead of failing.

use std::path::PathBuf;
use thiserror::Error;

/// Substrings that mark a store error as transient (lock or connection level).
const TRANSIENT_STORE_MARKERS: &[&str] = &[
    "database is locked",
    "database table is locked",
    "busy",
    "unable to open database",
    "disk i/o error",
    "connection",
    "conflict",
];

#[derive(Debug, Error)]
pub enum MergeGraphError {
    #[error("Graph store error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Invalid query: {message}")]
    Query { message: String },

    #[error("Hub request failed: {message}")]
    Network {
        message: String,
        /// HTTP status, when the server answered
        status_code: Option<u16>,
    },

    #[error("Hub request timed out after {0:?}")]
    Timeout(std::time::Duration),

    // Hub resolution outcomes, degraded to stub nodes by the indexer
    #[error("Model not found on the hub: {model_id}")]
    HubNotFound { model_id: String },

    #[error("Model {model_id} is gated: {message}")]
    HubGated { model_id: String, message: String },

    #[error("Invalid repository id: {0}")]
    InvalidRepoId(String),

    #[error("I/O failure ({path:?}): {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Invalid JSON: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Invalid YAML: {message}")]
    Yaml {
        message: String,
        #[source]
        source: Option<serde_yaml::Error>,
    },

    #[error("Job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("Invalid setting: {message}")]
    Config { message: String },

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, MergeGraphError>;

impl From<std::io::Error> for MergeGraphError {
    fn from(err: std::io::Error) -> Self {
        let message = err.to_string();
        MergeGraphError::Io {
            message,
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for MergeGraphError {
    fn from(err: serde_json::Error) -> Self {
        MergeGraphError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_yaml::Error> for MergeGraphError {
    fn from(err: serde_yaml::Error) -> Self {
        MergeGraphError::Yaml {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for MergeGraphError {
    fn from(err: rusqlite::Error) -> Self {
        MergeGraphError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for MergeGraphError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            MergeGraphError::Timeout(std::time::Duration::from_secs(0))
        } else {
            MergeGraphError::Network {
                message: err.to_string(),
                status_code: err.status().map(|s| s.as_u16()),
            }
        }
    }
}

impl MergeGraphError {
    /// I/O failure on `path`, e.g. a snapshot file.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        MergeGraphError::Io {
            message: err.to_string(),
            path: Some(path),
            source: Some(err),
        }
    }

    /// Lock or connection level store failure that is worth retrying.
    ///
    /// Recognized by matching known substrings in the error text.
    pub fn is_transient(&self) -> bool {
        match self {
            MergeGraphError::Database { message, .. } => {
                let message = message.to_lowercase();
                TRANSIENT_STORE_MARKERS
                    .iter()
                    .any(|marker| message.contains(marker))
            }
            _ => false,
        }
    }

    /// Timeouts, connection failures, 429 and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            MergeGraphError::Timeout(_) => true,
            MergeGraphError::Network { status_code, .. } => {
                status_code.map_or(true, |code| code == 429 || code >= 500)
            }
            _ => false,
        }
    }

    /// Expected, non-fatal hub resolution outcome.
    pub fn is_unresolvable_model(&self) -> bool {
        matches!(
            self,
            MergeGraphError::HubNotFound { .. }
                | MergeGraphError::HubGated { .. }
                | MergeGraphError::InvalidRepoId(_)
        )
    }
}
