//! # Case Names
//!
//! Every ensemble member ("case") is identified by a string embedded in the
//! file names of its time series, e.g.
//!
//! ```text
//! b.e21.BHISTsmbb.f09_g17.LE2-1011.001.cam.h0.FLNT.185001-185912.nc
//!                         ^^^^^^^^^^^^
//! ```
//!
//! Some ensembles split one logical member over several case names (a
//! historical run continued under a different experiment name). Those are
//! grouped into a single member name joined by a delimiter, and file
//! discovery splits the name again to pick up every part.

use crate::{EnsembleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Default separator between the case names of one grouped member.
pub const DEFAULT_DELIMITER: &str = "&&";

/// Forcing tags whose cases are grouped by case number, in grouping order.
const GROUPED_FORCINGS: [&str; 4] = ["AAER", "BMB", "EE", "GHG"];

/// Forcing tag whose cases are always kept as single members.
const UNGROUPED_FORCING: &str = "xAER";

// =============================================================================
// FILE NAME PATTERN
// =============================================================================

/// Markers surrounding the case name inside a file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseNamePattern {
    /// Text immediately before the case name (the grid tag).
    pub prefix: String,
    /// Text immediately after the case name (the component tag).
    pub suffix: String,
}

impl Default for CaseNamePattern {
    fn default() -> Self {
        Self {
            prefix: "f09_g17.".to_string(),
            suffix: ".cam.".to_string(),
        }
    }
}

/// Extract the case name from a file name.
///
/// Returns `None` when the prefix is missing or nothing separates it from
/// the suffix.
#[must_use]
pub fn case_name_from_file(file_name: &str, pattern: &CaseNamePattern) -> Option<String> {
    let (_, after_prefix) = file_name.split_once(pattern.prefix.as_str())?;
    let case = after_prefix
        .split_once(pattern.suffix.as_str())
        .map_or(after_prefix, |(case, _)| case);
    if case.is_empty() {
        None
    } else {
        Some(case.to_string())
    }
}

/// Whether a directory entry looks like a NetCDF file.
#[must_use]
pub fn is_netcdf_name(file_name: &str) -> bool {
    file_name.contains(".nc")
}

/// Sorted, de-duplicated case names found in `dir`.
pub fn generate_case_names(dir: &Path, pattern: &CaseNamePattern) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| EnsembleError::io(dir, e))?;

    let mut cases = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| EnsembleError::io(dir, e))?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !is_netcdf_name(file_name) {
            continue;
        }
        match case_name_from_file(file_name, pattern) {
            Some(case) => {
                cases.insert(case);
            }
            None => tracing::debug!(file = file_name, "no case name in file name, skipping"),
        }
    }

    Ok(cases.into_iter().collect())
}

// =============================================================================
// GROUPING
// =============================================================================

/// How case names are grouped into ensemble members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseGrouping {
    /// Every case is its own member.
    #[default]
    None,
    /// Single-forcing ensembles: cases sharing a forcing tag and case number
    /// form one member.
    SplitForcing,
}

/// Group case names into member names.
///
/// With [`CaseGrouping::SplitForcing`], for each forcing tag the cases
/// carrying it are grouped by their last three characters (the case
/// number); each group becomes one member whose name joins the group with
/// `delimiter`. `xAER` cases stay single. Cases with none of the tags are
/// dropped. The result is sorted and de-duplicated either way.
#[must_use]
pub fn combine_split_cases(cases: &[String], grouping: CaseGrouping, delimiter: &str) -> Vec<String> {
    match grouping {
        CaseGrouping::None => cases
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        CaseGrouping::SplitForcing => {
            let mut combined = BTreeSet::new();

            for forcing in GROUPED_FORCINGS {
                let tagged: Vec<&String> = cases.iter().filter(|c| c.contains(forcing)).collect();
                for case in &tagged {
                    let number = case_number(case);
                    let group: Vec<&str> = tagged
                        .iter()
                        .filter(|c| c.contains(number))
                        .map(|c| c.as_str())
                        .collect();
                    combined.insert(group.join(delimiter));
                }
            }

            for case in cases.iter().filter(|c| c.contains(UNGROUPED_FORCING)) {
                combined.insert(case.clone());
            }

            combined.into_iter().collect()
        }
    }
}

/// The last three characters of a case name.
fn case_number(case: &str) -> &str {
    let start = case
        .char_indices()
        .rev()
        .nth(2)
        .map_or(0, |(index, _)| index);
    &case[start..]
}

/// Split a (possibly grouped) member name into its case names.
#[must_use]
pub fn split_case_group<'a>(member: &'a str, delimiter: &str) -> Vec<&'a str> {
    if delimiter.is_empty() {
        return vec![member];
    }
    member.split(delimiter).collect()
}

// =============================================================================
// CASENAMES FILE
// =============================================================================

/// Read member names, one per line. Blank lines are ignored.
pub fn read_casenames(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| EnsembleError::io(path, e))?;
    Ok(content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Write member names, one per line.
pub fn write_casenames(path: &Path, names: &[String]) -> Result<()> {
    let mut content = String::new();
    for name in names {
        content.push_str(name);
        content.push('\n');
    }
    std::fs::write(path, content).map_err(|e| EnsembleError::io(path, e))
}

// =============================================================================
// TESTS
// =============================================================================
