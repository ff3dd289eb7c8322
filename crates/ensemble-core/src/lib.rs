//! # Ensemble Core
//!
//! Synchronous data engine for multi-member climate ensemble post-processing.
//!
//! The crate covers everything between "a directory tree of per-variable
//! time-series files" and "one dataset stacked along `ensemble_member`":
//!
//! - [`casenames`]: extract case names from file names, group split-forcing cases
//! - [`ensemble`]: registry of supported ensembles and their data roots
//! - [`discovery`]: select the files belonging to every ensemble member
//! - [`dataset`]: the labelled array model shared by every other module
//! - [`formats`]: NetCDF reader and writer (libnetcdf)
//! - [`combine`]: multi-file open and cross-member concatenation
//! - [`analysis`]: the per-member transform applied before combination
//!
//! Scheduling, logging setup and file output policy live in the app crate.

pub mod analysis;
pub mod casenames;
pub mod combine;
pub mod dataset;
pub mod discovery;
pub mod ensemble;
pub mod formats;

pub use analysis::{ANALYSES, Analysis, CloudRadiativeEffect, analysis_by_name};
pub use casenames::{CaseGrouping, CaseNamePattern, DEFAULT_DELIMITER};
pub use combine::{ENSEMBLE_MEMBER_DIM, combine_by_coords, concat_members, member_names, select_member};
pub use dataset::{AttrValue, Dataset, Dimension, Values, Variable};
pub use ensemble::{EnsembleEntry, EnsembleRegistry, EnsembleSpec};

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// ERROR TYPE
// =============================================================================

/// Errors produced by the core engine.
#[derive(Debug, Error)]
pub enum EnsembleError {
    /// Filesystem access failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The ensemble is not in the registry.
    #[error("ensemble {name} is not supported (supported: {})", .supported.join(", "))]
    UnsupportedEnsemble {
        name: String,
        supported: Vec<String>,
    },

    /// A registry file adds an ensemble without saying where its data is.
    #[error("ensemble {name} is not built in and needs a data_root")]
    IncompleteEnsemble { name: String },

    /// The ensemble registry file could not be parsed.
    #[error("invalid ensemble registry {}: {source}", .path.display())]
    Registry {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// libnetcdf failed to open, read or write a file.
    #[error("NetCDF error on {}: {source}", .path.display())]
    Netcdf {
        path: PathBuf,
        #[source]
        source: netcdf::Error,
    },

    /// A variable type the dataset model has no counterpart for.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A variable claims more data than its file can hold.
    #[error("variable {name} in {} claims {bytes} bytes, more than the file holds", .path.display())]
    TruncatedVariable {
        path: PathBuf,
        name: String,
        bytes: u64,
    },

    /// Dataset structure is inconsistent (dims, lengths, types).
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    /// A required variable is absent.
    #[error("variable {name} not found{}", context_suffix(.context))]
    MissingVariable { name: String, context: String },

    /// Two inputs disagree on a variable that must be identical.
    #[error("conflicting values for variable {0} while merging")]
    MergeConflict(String),

    /// Member datasets cannot be stacked together.
    #[error("cannot concatenate members: {0}")]
    ConcatMismatch(String),

    /// The analysis transform failed.
    #[error("analysis {analysis} failed for {case}: {reason}")]
    Analysis {
        analysis: String,
        case: String,
        reason: String,
    },
}

fn context_suffix(context: &str) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!(" in {context}")
    }
}

impl EnsembleError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for the core engine.
pub type Result<T> = std::result::Result<T, EnsembleError>;
