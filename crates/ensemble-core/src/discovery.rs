//! # File Discovery
//!
//! Time series are stored one directory per variable, each directory holding
//! the files of every member:
//!
//! ```text
//! <data_root>/<data_freq>/FLNT/<case>...FLNT.185001-185912.nc
//! <data_root>/<data_freq>/FLNT/<case>...FLNT.186001-186912.nc
//! <data_root>/<data_freq>/FSNT/<case>...FSNT.185001-185912.nc
//! ```
//!
//! A member's files are every `.nc` file, across the requested variables,
//! whose name contains one of the member's case names.

use crate::casenames::{is_netcdf_name, split_case_group};
use crate::{EnsembleError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// All `.nc` file names in a directory.
fn list_netcdf_files(dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| EnsembleError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| EnsembleError::io(dir, e))?;
        if let Some(name) = entry.file_name().to_str()
            && is_netcdf_name(name)
        {
            files.push(name.to_string());
        }
    }
    Ok(files)
}

/// Map every member name to its sorted, de-duplicated list of files.
///
/// `path` is the frequency directory; each variable is a sub-directory.
/// Grouped member names are split on `delimiter` and a file is selected
/// when it contains any of the parts.
pub fn generate_ensemble_filenames(
    variables: &[&str],
    casenames: &[String],
    path: &Path,
    delimiter: &str,
) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    // Each variable directory is listed once, not once per member.
    let mut listings = Vec::with_capacity(variables.len());
    for variable in variables {
        let dir = path.join(variable);
        let files = list_netcdf_files(&dir)?;
        tracing::debug!(variable, files = files.len(), "listed variable directory");
        listings.push((dir, files));
    }

    let total = casenames.len();
    let mut case_files = BTreeMap::new();

    for (index, member) in casenames.iter().enumerate() {
        tracing::debug!("generating files for case {} of {}: {}", index + 1, total, member);

        let parts = split_case_group(member, delimiter);
        let mut selected = BTreeSet::new();

        for (dir, files) in &listings {
            for file in files {
                if parts.iter().any(|part| file.contains(part)) {
                    selected.insert(dir.join(file));
                }
            }
        }

        case_files.insert(member.clone(), selected.into_iter().collect());
    }

    Ok(case_files)
}

// =============================================================================
// TESTS
// =============================================================================
