//! # Pipeline
//!
//! One analysis run, start to finish:
//!
//! 1. read the case names (two of them in testing mode)
//! 2. find every member's files for the analysis' variables
//! 3. per member: read the files, combine them along `time`, apply the analysis
//! 4. stack the member outputs along `ensemble_member`
//! 5. save, falling back to one file per member
//!
//! Step 3 runs in order on the calling thread, or on a [`Cluster`] when the
//! run is parallel.

use crate::cluster::{Cluster, Scheduler, Task, setup_cluster, task};
use crate::config::{ClusterConfig, SaveTarget};
use crate::error::{AppError, AppResult};
use crate::logging::logs_every_file;
use crate::save::{DatasetWriter, NetcdfWriter, SaveReport, save_with_fallback};
use ensemble_core::analysis::ANALYSES;
use ensemble_core::casenames::read_casenames;
use ensemble_core::discovery::generate_ensemble_filenames;
use ensemble_core::formats::read_dataset;
use ensemble_core::{
    Analysis, DEFAULT_DELIMITER, Dataset, ENSEMBLE_MEMBER_DIM, EnsembleError, EnsembleSpec,
    analysis_by_name, combine_by_coords, concat_members,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Members analyzed in testing mode.
pub const TESTING_MEMBERS: usize = 2;

/// Dimension a member's files are joined along.
pub const TIME_DIM: &str = "time";

/// Everything a run needs.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub casenames_file: PathBuf,
    pub data_freq: String,
    pub ensemble: EnsembleSpec,
    pub target: SaveTarget,
    pub parallel: bool,
    pub testing_mode: bool,
    pub scheduler: Scheduler,
    pub cluster: ClusterConfig,
    pub user: Option<String>,
    pub analysis: String,
    pub verbosity: u32,
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub ensemble: String,
    pub analysis: String,
    pub members: Vec<String>,
    pub parallel: bool,
    pub workers: usize,
    pub save: SaveReport,
    pub elapsed_seconds: f64,
}

/// Drop repeated case names, keeping the first occurrence of each.
pub fn unique_casenames(casenames: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    casenames
        .into_iter()
        .filter(|name| {
            let first = seen.insert(name.clone());
            if !first {
                tracing::warn!("Case {name} is listed more than once; analyzing it once");
            }
            first
        })
        .collect()
}

/// Read, combine and transform one member.
pub fn process_member(
    files: &[PathBuf],
    analysis: &dyn Analysis,
    member: &str,
) -> AppResult<Dataset> {
    if files.is_empty() {
        return Err(EnsembleError::InvalidDataset(format!("no files found for case {member}")).into());
    }
    let datasets = files
        .iter()
        .map(|path| read_dataset(path))
        .collect::<Result<Vec<_>, _>>()?;
    let combined = combine_by_coords(datasets, TIME_DIM)?;
    Ok(analysis.apply(combined, member)?)
}

/// Run an analysis, writing NetCDF output.
pub fn run_analysis(options: &AnalysisOptions) -> AppResult<RunSummary> {
    run_analysis_with(options, &NetcdfWriter)
}

/// Run an analysis with a caller-supplied writer.
pub fn run_analysis_with(
    options: &AnalysisOptions,
    writer: &dyn DatasetWriter,
) -> AppResult<RunSummary> {
    let started = Instant::now();

    let analysis: Arc<dyn Analysis> = analysis_by_name(&options.analysis)
        .map(Arc::from)
        .ok_or_else(|| AppError::UnknownAnalysis {
            name: options.analysis.clone(),
            available: ANALYSES.iter().map(|s| (*s).to_string()).collect(),
        })?;

    let cluster = if options.parallel {
        tracing::info!("Flag \"parallel\" set to TRUE.");
        Some(setup_cluster(
            options.scheduler,
            &options.cluster,
            options.user.as_deref(),
        )?)
    } else {
        tracing::info!("Flag \"parallel\" set to FALSE. Computation proceeding in serial");
        None
    };

    let result = execute(options, analysis, cluster.as_ref(), writer);

    if let Some(cluster) = cluster {
        cluster.close();
    }

    let (members, save, workers) = result?;
    let elapsed = started.elapsed();
    tracing::info!("Analysis script complete.");
    tracing::info!("Analysis script duration: {:.3?}", elapsed);

    Ok(RunSummary {
        ensemble: options.ensemble.name.clone(),
        analysis: options.analysis.clone(),
        members,
        parallel: options.parallel,
        workers,
        save,
        elapsed_seconds: elapsed.as_secs_f64(),
    })
}

fn execute(
    options: &AnalysisOptions,
    analysis: Arc<dyn Analysis>,
    cluster: Option<&Cluster>,
    writer: &dyn DatasetWriter,
) -> AppResult<(Vec<String>, SaveReport, usize)> {
    tracing::info!("Reading in case names");
    let mut casenames = unique_casenames(read_casenames(&options.casenames_file)?);

    if options.testing_mode {
        tracing::warn!(
            "RUNNING IN TESTING MODE: analyzing {} ensemble members",
            TESTING_MEMBERS
        );
        casenames.truncate(TESTING_MEMBERS);
    }
    if casenames.is_empty() {
        return Err(AppError::NoMembers);
    }

    let data_path = options.ensemble.frequency_dir(&options.data_freq);
    let mut case_files = generate_ensemble_filenames(
        analysis.variables(),
        &casenames,
        &data_path,
        DEFAULT_DELIMITER,
    )?;

    tracing::info!("Iterating over ensemble members");
    let mut tasks: Vec<(String, Task<Dataset>)> = Vec::with_capacity(casenames.len());
    for member in &casenames {
        let files = case_files.remove(member).unwrap_or_default();
        tracing::debug!("Prepare task for case: {member} ({} files)", files.len());
        if logs_every_file(options.verbosity) {
            for file in &files {
                tracing::debug!("{}", file.display());
            }
        }
        let analysis = Arc::clone(&analysis);
        let name = member.clone();
        tasks.push((
            member.clone(),
            task(move || process_member(&files, analysis.as_ref(), &name)),
        ));
    }
    tracing::info!("COMPLETED iterating over ensemble members.");

    let (outputs, workers) = match cluster {
        Some(cluster) => {
            tracing::info!("Performing parallel computation on {} workers", cluster.workers());
            (cluster.compute(tasks)?, cluster.workers())
        }
        None => {
            let mut outputs = Vec::with_capacity(tasks.len());
            for (member, work) in tasks {
                tracing::debug!("Computing case {member}");
                outputs.push(work()?);
            }
            (outputs, 1)
        }
    };

    tracing::info!("Computations complete. Combining output for saving");
    let members: Vec<(String, Dataset)> = casenames.iter().cloned().zip(outputs).collect();
    let combined = concat_members(members, ENSEMBLE_MEMBER_DIM)?;

    let save = save_with_fallback(combined, &options.target, &options.ensemble.name, writer)?;
    Ok((casenames, save, workers))
}

// =============================================================================
// TESTS
// =============================================================================
