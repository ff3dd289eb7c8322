//! # Save
//!
//! Writes the combined ensemble dataset.
//!
//! The whole ensemble goes into one file first. If libnetcdf refuses that
//! write (a full disk, a quota, an HDF5 failure on a very large file), the
//! partial file is removed and every member is written to its own file
//! in a sub-directory named after the run. Member failures are collected
//! and reported; they do not stop the remaining members.

use crate::config::SaveTarget;
use crate::error::{AppError, AppResult};
use ensemble_core::formats::write_dataset;
use ensemble_core::{AttrValue, Dataset, ENSEMBLE_MEMBER_DIM, member_names, select_member};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Variables that do not survive the round trip through the writer.
pub const PROBLEM_VARIABLES: &[&str] = &["date_written", "time_written"];

/// Calendar stamped on the time coordinate of every output file.
pub const TIME_CALENDAR: &str = "noleap";

// =============================================================================
// WRITER
// =============================================================================

/// Persists a dataset to a path.
pub trait DatasetWriter: Send + Sync {
    fn write(&self, path: &Path, dataset: &Dataset) -> AppResult<()>;
}

/// NetCDF-4 output through libnetcdf.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfWriter;

impl DatasetWriter for NetcdfWriter {
    fn write(&self, path: &Path, dataset: &Dataset) -> AppResult<()> {
        write_dataset(path, dataset)?;
        Ok(())
    }
}

// =============================================================================
// REPORT
// =============================================================================

/// Which tier the save ended in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum SaveReport {
    /// Every member in one file.
    Combined { path: PathBuf },
    /// One file per member.
    PerMember {
        dir: PathBuf,
        saved: Vec<PathBuf>,
        failed: Vec<String>,
    },
}

impl SaveReport {
    /// Number of files written.
    pub fn files_written(&self) -> usize {
        match self {
            Self::Combined { .. } => 1,
            Self::PerMember { saved, .. } => saved.len(),
        }
    }

    /// Members that could not be saved.
    pub fn failed(&self) -> &[String] {
        match self {
            Self::Combined { .. } => &[],
            Self::PerMember { failed, .. } => failed,
        }
    }
}

// =============================================================================
// FILE NAMES
// =============================================================================

/// `{ENSEMBLE}_{save_name}_{N}_ens_members.nc`
pub fn combined_filename(ensemble: &str, save_name: &str, members: usize) -> String {
    format!("{ensemble}_{save_name}_{members}_ens_members.nc")
}

/// `{member}_{ENSEMBLE}_{save_name}.nc`
pub fn member_filename(member: &str, ensemble: &str, save_name: &str) -> String {
    format!("{member}_{ensemble}_{save_name}.nc")
}

// =============================================================================
// SAVE
// =============================================================================

/// Drop variables the writer cannot carry and fix the time encoding.
pub fn prepare_for_save(dataset: &mut Dataset) {
    for &name in PROBLEM_VARIABLES {
        if dataset.drop_vars(&[name]).is_empty() {
            tracing::debug!("{name} not found in dataset");
        } else {
            tracing::debug!("Removed {name} from dataset");
        }
    }
    if let Some(time) = dataset.variables.get_mut("time") {
        time.attrs
            .insert("calendar".to_string(), AttrValue::text(TIME_CALENDAR));
    }
}

/// Remove a file left behind by a failed write.
fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "could not remove partial file: {e}"),
    }
}

fn create_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        tracing::info!("Creating directory {}", path.display());
        std::fs::create_dir_all(path).map_err(|e| AppError::io(path, e))?;
    }
    Ok(())
}

/// Save the ensemble, falling back to one file per member.
pub fn save_with_fallback(
    mut dataset: Dataset,
    target: &SaveTarget,
    ensemble: &str,
    writer: &dyn DatasetWriter,
) -> AppResult<SaveReport> {
    tracing::info!("Saving data...");
    create_dir(&target.save_path)?;
    prepare_for_save(&mut dataset);

    let members = member_names(&dataset, ENSEMBLE_MEMBER_DIM)?;
    let path = target
        .save_path
        .join(combined_filename(ensemble, &target.save_name, members.len()));

    tracing::info!("Attempting to write all ensemble members to the same file.");
    let error = match writer.write(&path, &dataset) {
        Ok(()) => {
            tracing::info!("Data successfully saved to: {}", path.display());
            return Ok(SaveReport::Combined { path });
        }
        Err(e) => e,
    };

    remove_partial(&path);
    let dir = target.save_path.join(&target.save_name);
    create_dir(&dir)?;

    tracing::warn!("Unable to write all ensemble members to the same file: {error}");
    tracing::warn!("Writing one file per ensemble member in {}", dir.display());

    let total = members.len();
    let mut saved = Vec::with_capacity(total);
    let mut failed = Vec::new();

    for (index, member) in members.iter().enumerate() {
        let file_name = member_filename(member, ensemble, &target.save_name);
        let member_path = dir.join(&file_name);
        tracing::info!("Case {} of {}. Saving {}", index + 1, total, file_name);

        let result = select_member(&dataset, ENSEMBLE_MEMBER_DIM, member)
            .map_err(AppError::from)
            .and_then(|single| writer.write(&member_path, &single));

        match result {
            Ok(()) => saved.push(member_path),
            Err(e) => {
                remove_partial(&member_path);
                tracing::error!("Unable to save data for case {member}: {e}");
                failed.push(member.clone());
            }
        }
    }

    if failed.is_empty() {
        tracing::warn!("All cases successfully saved to individual files");
        tracing::info!("Saved data located in {}", dir.display());
    } else {
        tracing::error!("Unable to save data for the following cases:");
        for member in &failed {
            tracing::error!("    {member}");
        }
        tracing::error!("Successfully wrote {}/{} files", total - failed.len(), total);
    }

    Ok(SaveReport::PerMember { dir, saved, failed })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ensemble_core::formats::read_dataset;
    use ensemble_core::{Dimension, Values, Variable, concat_members};

    fn member(value: f32) -> Dataset {
        let mut ds = Dataset::new();
        ds.add_dim(Dimension::unlimited("time", 2)).unwrap();
        ds.add_variable(
            "time",
            Variable::new(["time"], Values::Double(vec![0.0, 31.0]))
                .with_attr("units", AttrValue::text("days since 1850-01-01")),
        )
        .unwrap();
        ds.add_variable(
            "date_written",
            Variable::new(
                ["time"],
                Values::Str(vec!["01/01/20".to_string(), "01/01/20".to_string()]),
            ),
        )
        .unwrap();
        ds.add_variable(
            "LWCRE",
            Variable::new(["time"], Values::Float(vec![value, value + 1.0])),
        )
        .unwrap();
        ds
    }

    fn ensemble() -> Dataset {
        concat_members(
            vec![
                ("A.001".to_string(), member(1.0)),
                ("A.002".to_string(), member(2.0)),
            ],
            ENSEMBLE_MEMBER_DIM,
        )
        .unwrap()
    }

    fn target(dir: &Path) -> SaveTarget {
        SaveTarget {
            save_path: dir.join("out"),
            save_name: "cre".to_string(),
        }
    }

    /// Writes a few bytes, then fails for any path containing a pattern.
    struct FailingWriter {
        patterns: Vec<&'static str>,
    }

    impl DatasetWriter for FailingWriter {
        fn write(&self, path: &Path, dataset: &Dataset) -> AppResult<()> {
            let name = path.to_string_lossy();
            if self.patterns.iter().any(|p| name.contains(p)) {
                std::fs::write(path, b"CDF").unwrap();
                return Err(AppError::Cluster("disk full".to_string()));
            }
            NetcdfWriter.write(path, dataset)
        }
    }

    #[test]
    fn combined_file_when_write_succeeds() {
        let temp = tempfile::tempdir().unwrap();
        let target = target(temp.path());

        let report = save_with_fallback(ensemble(), &target, "CESM2-LE", &NetcdfWriter).unwrap();

        let expected = target.save_path.join("CESM2-LE_cre_2_ens_members.nc");
        assert_eq!(report, SaveReport::Combined { path: expected.clone() });

        let written = read_dataset(&expected).unwrap();
        assert!(written.variable("date_written").is_none());
        assert_eq!(
            written.variable("time").unwrap().text_attr("calendar"),
            Some("noleap")
        );
        assert_eq!(
            written.variable("time").unwrap().text_attr("units"),
            Some("days since 1850-01-01")
        );
    }

    #[test]
    fn falls_back_to_one_file_per_member() {
        let temp = tempfile::tempdir().unwrap();
        let target = target(temp.path());
        let writer = FailingWriter {
            patterns: vec!["_ens_members"],
        };

        let report = save_with_fallback(ensemble(), &target, "CESM2-LE", &writer).unwrap();

        let dir = target.save_path.join("cre");
        assert!(!target.save_path.join("CESM2-LE_cre_2_ens_members.nc").exists());
        let SaveReport::PerMember { dir: report_dir, saved, failed } = report else {
            unreachable!("expected per-member fallback");
        };
        assert_eq!(report_dir, dir);
        assert!(failed.is_empty());
        assert_eq!(
            saved,
            vec![
                dir.join("A.001_CESM2-LE_cre.nc"),
                dir.join("A.002_CESM2-LE_cre.nc"),
            ]
        );

        let second = read_dataset(&saved[1]).unwrap();
        assert_eq!(
            second.variable("LWCRE").unwrap().values,
            Values::Float(vec![2.0, 3.0])
        );
    }

    #[test]
    fn real_writer_failure_falls_back_to_member_files() {
        let temp = tempfile::tempdir().unwrap();
        let target = target(temp.path());
        // A directory where the combined file belongs makes libnetcdf fail.
        let blocked = target.save_path.join("CESM2-LE_cre_2_ens_members.nc");
        std::fs::create_dir_all(&blocked).unwrap();

        let report = save_with_fallback(ensemble(), &target, "CESM2-LE", &NetcdfWriter).unwrap();

        assert!(blocked.is_dir());
        assert!(report.failed().is_empty());
        assert_eq!(report.files_written(), 2);
        let first = read_dataset(&target.save_path.join("cre").join("A.001_CESM2-LE_cre.nc")).unwrap();
        assert_eq!(
            first.variable("LWCRE").unwrap().values,
            Values::Float(vec![1.0, 2.0])
        );
        assert_eq!(
            first.variable(ENSEMBLE_MEMBER_DIM).unwrap().values,
            Values::Str(vec!["A.001".to_string()])
        );
    }

    #[test]
    fn member_failures_are_collected() {
        let temp = tempfile::tempdir().unwrap();
        let target = target(temp.path());
        let writer = FailingWriter {
            patterns: vec!["_ens_members", "A.001"],
        };

        let report = save_with_fallback(ensemble(), &target, "CESM2-LE", &writer).unwrap();

        assert_eq!(report.failed(), ["A.001".to_string()]);
        assert_eq!(report.files_written(), 1);
        assert!(!target.save_path.join("cre").join("A.001_CESM2-LE_cre.nc").exists());
    }

    #[test]
    fn filenames() {
        assert_eq!(
            combined_filename("CESM2-SF", "cre", 15),
            "CESM2-SF_cre_15_ens_members.nc"
        );
        assert_eq!(
            member_filename("HIST.GHG.001&&SSP.GHG.001", "CESM2-SF", "cre"),
            "HIST.GHG.001&&SSP.GHG.001_CESM2-SF_cre.nc"
        );
    }
}
