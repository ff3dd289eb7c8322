//! # Application Errors
//!
//! Everything the binary can fail with. Core engine errors are wrapped
//! unchanged so their messages reach the log as-is.

use ensemble_core::EnsembleError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] EnsembleError),

    #[error("job scheduler {name} is not supported (supported: {})", .supported.join(", "))]
    UnsupportedScheduler {
        name: String,
        supported: Vec<String>,
    },

    #[error("analysis {name} is not known (available: {})", .available.join(", "))]
    UnknownAnalysis {
        name: String,
        available: Vec<String>,
    },

    /// A TRUE/FALSE style flag had some other value.
    #[error("unable to interpret flag {flag} = \"{value}\": must be either TRUE or FALSE")]
    InvalidFlag { flag: String, value: String },

    #[error("cluster error: {0}")]
    Cluster(String),

    /// A member task panicked or was cancelled.
    #[error("worker failed for {member}: {reason}")]
    WorkerFailed { member: String, reason: String },

    #[error("no ensemble members to analyze")]
    NoMembers,

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("logging setup failed: {0}")]
    Logging(String),
}

impl AppError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
