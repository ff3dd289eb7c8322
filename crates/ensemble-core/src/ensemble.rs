//! # Ensemble Registry
//!
//! Which ensembles the toolkit knows about, where their time series live
//! and how their case names are grouped.
//!
//! Two ensembles are built in. Others can be added (or the built-in ones
//! adjusted) with a JSON file:
//!
//! ```json
//! [
//!   { "name": "MY-LE", "data_root": "/data/my-le/tseries", "grouping": "none" },
//!   { "name": "CESM2-SF", "data_root": "/scratch/sf" }
//! ]
//! ```
//!
//! An entry naming a known ensemble only changes the fields it lists. A new
//! ensemble needs a `data_root`; its grouping defaults to `none`.

use crate::casenames::CaseGrouping;
use crate::{EnsembleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One supported ensemble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsembleSpec {
    /// Upper-case ensemble name.
    pub name: String,
    /// Directory holding `<data_freq>/<VARIABLE>/*.nc`.
    pub data_root: PathBuf,
    pub grouping: CaseGrouping,
}

impl EnsembleSpec {
    #[must_use]
    pub fn new(name: &str, data_root: impl Into<PathBuf>, grouping: CaseGrouping) -> Self {
        Self {
            name: name.to_uppercase(),
            data_root: data_root.into(),
            grouping,
        }
    }

    /// Directory of one output frequency, e.g. `month_1`.
    #[must_use]
    pub fn frequency_dir(&self, data_freq: &str) -> PathBuf {
        self.data_root.join(data_freq)
    }

    /// Directory holding every member's files for one variable.
    #[must_use]
    pub fn variable_dir(&self, data_freq: &str, variable: &str) -> PathBuf {
        self.frequency_dir(data_freq).join(variable)
    }
}

/// One entry of a registry file. Absent fields keep their current value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnsembleEntry {
    pub name: String,
    #[serde(default)]
    pub data_root: Option<PathBuf>,
    #[serde(default)]
    pub grouping: Option<CaseGrouping>,
}

/// Registry of supported ensembles, keyed by upper-case name.
#[derive(Debug, Clone, Default)]
pub struct EnsembleRegistry {
    ensembles: BTreeMap<String, EnsembleSpec>,
}

impl EnsembleRegistry {
    /// The ensembles supported out of the box.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.insert(EnsembleSpec::new(
            "CESM2-SF",
            "/glade/campaign/cesm/collections/CESM2-SF/timeseries/atm/proc/tseries",
            CaseGrouping::SplitForcing,
        ));
        registry.insert(EnsembleSpec::new(
            "CESM2-LE",
            "/glade/campaign/cgd/cesm/CESM2-LE/timeseries/atm/proc/tseries",
            CaseGrouping::None,
        ));
        registry
    }

    /// Parse a JSON array of [`EnsembleEntry`].
    pub fn read_entries(path: &Path) -> Result<Vec<EnsembleEntry>> {
        let content = std::fs::read_to_string(path).map_err(|e| EnsembleError::io(path, e))?;
        serde_json::from_str(&content).map_err(|source| EnsembleError::Registry {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply every entry of a registry file.
    pub fn extend_from_json_file(&mut self, path: &Path) -> Result<()> {
        for entry in Self::read_entries(path)? {
            self.apply(entry)?;
        }
        Ok(())
    }

    /// Update a known ensemble with the fields `entry` sets, or register a
    /// new one.
    pub fn apply(&mut self, entry: EnsembleEntry) -> Result<()> {
        let key = entry.name.to_uppercase();
        if let Some(existing) = self.ensembles.get_mut(&key) {
            if let Some(root) = entry.data_root {
                existing.data_root = root;
            }
            if let Some(grouping) = entry.grouping {
                existing.grouping = grouping;
            }
            return Ok(());
        }

        let data_root = entry
            .data_root
            .ok_or(EnsembleError::IncompleteEnsemble { name: key.clone() })?;
        self.insert(EnsembleSpec::new(
            &key,
            data_root,
            entry.grouping.unwrap_or_default(),
        ));
        Ok(())
    }

    /// Add or replace an ensemble. The name is upper-cased.
    pub fn insert(&mut self, mut spec: EnsembleSpec) {
        spec.name = spec.name.to_uppercase();
        self.ensembles.insert(spec.name.clone(), spec);
    }

    /// Look up an ensemble by name, case-insensitively.
    pub fn get(&self, name: &str) -> Result<&EnsembleSpec> {
        self.ensembles
            .get(&name.to_uppercase())
            .ok_or_else(|| EnsembleError::UnsupportedEnsemble {
                name: name.to_uppercase(),
                supported: self.supported(),
            })
    }

    /// Names of every registered ensemble, sorted.
    #[must_use]
    pub fn supported(&self) -> Vec<String> {
        self.ensembles.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnsembleSpec> {
        self.ensembles.values()
    }
}

// =============================================================================
// TESTS
// =============================================================================
