//! # Configuration
//!
//! Flag parsing, ensemble resolution and the cluster resource defaults.

use crate::error::{AppError, AppResult};
use ensemble_core::{EnsembleRegistry, EnsembleSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// FLAGS
// =============================================================================

/// Interpret a TRUE/FALSE flag value.
///
/// Case-insensitive; `1`/`0` and `yes`/`no` are accepted as well.
pub fn parse_flag(flag: &str, value: &str) -> AppResult<bool> {
    match value.trim().to_uppercase().as_str() {
        "TRUE" | "1" | "YES" => Ok(true),
        "FALSE" | "0" | "NO" => Ok(false),
        _ => Err(AppError::InvalidFlag {
            flag: flag.to_string(),
            value: value.to_string(),
        }),
    }
}

// =============================================================================
// ENSEMBLES
// =============================================================================

/// Built-in ensembles, extended by an optional JSON registry file.
pub fn load_registry(ensembles_config: Option<&Path>) -> AppResult<EnsembleRegistry> {
    let mut registry = EnsembleRegistry::builtin();
    if let Some(path) = ensembles_config {
        registry.extend_from_json_file(path)?;
        tracing::debug!(path = %path.display(), "loaded ensemble registry");
    }
    Ok(registry)
}

/// Look up an ensemble, applying a data root override.
pub fn resolve_ensemble(
    name: &str,
    ensembles_config: Option<&Path>,
    data_root: Option<&Path>,
) -> AppResult<EnsembleSpec> {
    let registry = load_registry(ensembles_config)?;
    let mut spec = registry.get(name)?.clone();
    tracing::info!("Ensemble: {} is supported by this application.", spec.name);

    if let Some(root) = data_root {
        spec.data_root = root.to_path_buf();
    }
    Ok(spec)
}

// =============================================================================
// CLUSTER
// =============================================================================

/// Worker count and PBS resources.
///
/// Defaults follow the Casper queue setup the toolkit was written for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Explicit worker count; overrides every other source.
    pub workers: Option<usize>,
    /// CPUs requested per job.
    pub cores: u32,
    /// Memory requested per job.
    pub memory: String,
    pub processes: u32,
    pub queue: String,
    pub local_directory: String,
    /// Full `-l` selection; built from `cores` and `memory` when unset.
    pub resource_spec: Option<String>,
    pub project: String,
    pub walltime: String,
    /// Number of jobs the PBS cluster is scaled to.
    pub scale: u32,
    /// Login node used in the SSH tunnel hint.
    pub login_host: String,
}

impl ClusterConfig {
    /// The PBS `-l` resource selection.
    pub fn resource_spec(&self) -> String {
        match &self.resource_spec {
            Some(spec) => spec.clone(),
            None => format!("select=1:ncpus={}:mem={}", self.cores, self.memory),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            workers: None,
            cores: 6,
            memory: "128GB".to_string(),
            processes: 12,
            queue: "casper".to_string(),
            local_directory: "$TMPDIR".to_string(),
            resource_spec: None,
            project: "UHAR0008".to_string(),
            walltime: "02:00:00".to_string(),
            scale: 10,
            login_host: "casper.ucar.edu".to_string(),
        }
    }
}

/// Where analysis output goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveTarget {
    pub save_path: PathBuf,
    pub save_name: String,
}

// =============================================================================
// TESTS
// =============================================================================
