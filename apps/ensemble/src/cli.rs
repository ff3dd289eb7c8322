//! # CLI Module
//!
//! Command-line interface for the ensemble toolkit.
//!
//! Each subcommand is a `cmd_*` function returning its result, so the
//! integration tests can drive them without spawning the binary. Long flags
//! also accept underscore spellings (`--casenames_file`).

use crate::cluster::{Scheduler, render_pbs_script};
use crate::config::{ClusterConfig, SaveTarget, load_registry, parse_flag, resolve_ensemble};
use crate::error::{AppError, AppResult};
use crate::logging::{DEFAULT_VERBOSITY, LogFormat};
use crate::pipeline::{AnalysisOptions, RunSummary, run_analysis};
use clap::{Args, Parser, Subcommand};
use ensemble_core::casenames::{combine_split_cases, generate_case_names, write_casenames};
use ensemble_core::{CaseNamePattern, DEFAULT_DELIMITER, EnsembleSpec};
use std::path::{Path, PathBuf};

// =============================================================================
// CLI STRUCTURE
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "ensemble")]
#[command(about = "Post-process multi-member climate ensemble output", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Numeric log level (10 debug, 20 info, 30 warning, 40 error; below 10 lists every file)
    #[arg(
        long,
        global = true,
        num_args = 0..=1,
        default_value_t = DEFAULT_VERBOSITY,
        default_missing_value = "10"
    )]
    pub verbose: u32,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate the case names of an ensemble and write them to a file
    Casenames(CasenamesArgs),

    /// Run an analysis over every ensemble member
    Analyze(AnalyzeArgs),

    /// List the supported ensembles
    Ensembles {
        /// Print as JSON
        #[arg(long)]
        json: bool,

        /// JSON file adding or overriding ensembles
        #[arg(long, alias = "ensembles_config")]
        ensembles_config: Option<PathBuf>,
    },

    /// Write a PBS job script that runs an analysis
    Submit(SubmitArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CasenamesArgs {
    /// Output frequency directory, e.g. month_1
    #[arg(long, alias = "data_freq")]
    pub data_freq: String,

    /// File the case names are written to
    #[arg(long, alias = "casenames_file")]
    pub casenames_file: PathBuf,

    #[arg(long, alias = "ensemble_name")]
    pub ensemble_name: String,

    /// Variable directory scanned for case names
    #[arg(long, default_value = "FLNT")]
    pub scan_variable: String,

    /// Override the ensemble's data root
    #[arg(long)]
    pub data_root: Option<PathBuf>,

    /// JSON file adding or overriding ensembles
    #[arg(long, alias = "ensembles_config")]
    pub ensembles_config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    #[arg(long, alias = "casenames_file")]
    pub casenames_file: PathBuf,

    #[arg(long, alias = "data_freq")]
    pub data_freq: String,

    #[arg(long, alias = "ensemble_name")]
    pub ensemble_name: String,

    /// Directory output is written to
    #[arg(long, alias = "save_path")]
    pub save_path: PathBuf,

    /// Name used in output file names
    #[arg(long, alias = "save_name")]
    pub save_name: String,

    /// TRUE or FALSE
    #[arg(long, default_value = "TRUE")]
    pub parallel: String,

    /// TRUE analyzes only the first two members
    #[arg(long, alias = "testing_mode", default_value = "FALSE")]
    pub testing_mode: String,

    /// LOCAL or PBS
    #[arg(long, alias = "job_scheduler", default_value = "LOCAL")]
    pub job_scheduler: String,

    /// User name for the SSH tunnel hint
    #[arg(long)]
    pub user: Option<String>,

    /// Analysis to apply to each member
    #[arg(long, default_value = "cre")]
    pub analysis: String,

    /// Override the ensemble's data root
    #[arg(long)]
    pub data_root: Option<PathBuf>,

    /// JSON file adding or overriding ensembles
    #[arg(long, alias = "ensembles_config")]
    pub ensembles_config: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub cluster: ClusterArgs,
}

/// Worker pool and PBS resources. Unset values keep the defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct ClusterArgs {
    /// Concurrent member tasks
    #[arg(long)]
    pub workers: Option<usize>,

    #[arg(long)]
    pub project: Option<String>,

    #[arg(long)]
    pub queue: Option<String>,

    #[arg(long)]
    pub walltime: Option<String>,

    /// CPUs requested per job
    #[arg(long)]
    pub cores: Option<u32>,

    /// Memory requested per job, e.g. 256GB
    #[arg(long)]
    pub memory: Option<String>,

    /// Full PBS resource selection; overrides --cores and --memory
    #[arg(long)]
    pub resource_spec: Option<String>,

    #[arg(long)]
    pub processes: Option<u32>,

    #[arg(long)]
    pub scale: Option<u32>,

    #[arg(long)]
    pub local_directory: Option<String>,
}

impl ClusterArgs {
    pub fn to_config(&self) -> ClusterConfig {
        let mut config = ClusterConfig {
            workers: self.workers,
            ..ClusterConfig::default()
        };
        if let Some(project) = &self.project {
            config.project.clone_from(project);
        }
        if let Some(queue) = &self.queue {
            config.queue.clone_from(queue);
        }
        if let Some(walltime) = &self.walltime {
            config.walltime.clone_from(walltime);
        }
        if let Some(memory) = &self.memory {
            config.memory.clone_from(memory);
        }
        if let Some(spec) = &self.resource_spec {
            config.resource_spec = Some(spec.clone());
        }
        if let Some(cores) = self.cores {
            config.cores = cores;
        }
        if let Some(dir) = &self.local_directory {
            config.local_directory.clone_from(dir);
        }
        if let Some(processes) = self.processes {
            config.processes = processes;
        }
        if let Some(scale) = self.scale {
            config.scale = scale;
        }
        config
    }
}

#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    /// Where the job script is written
    #[arg(long)]
    pub script: PathBuf,

    #[arg(long, default_value = "ensemble-analysis")]
    pub job_name: String,

    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Arguments passed to `ensemble analyze` on the compute node
    #[arg(last = true)]
    pub analyze_args: Vec<String>,
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Dispatch a parsed command line.
pub fn run(cli: Cli) -> AppResult<()> {
    match cli.command {
        Commands::Casenames(args) => cmd_casenames(&args).map(|_| ()),
        Commands::Analyze(args) => cmd_analyze(&args, cli.verbose).map(|_| ()),
        Commands::Ensembles {
            json,
            ensembles_config,
        } => cmd_ensembles(ensembles_config.as_deref(), json).map(|_| ()),
        Commands::Submit(args) => cmd_submit(&args, cli.verbose).map(|_| ()),
    }
}

/// Scan one variable directory for case names and write them, grouped.
pub fn cmd_casenames(args: &CasenamesArgs) -> AppResult<Vec<String>> {
    tracing::info!("Generating list of case names");
    let spec = resolve_ensemble(
        &args.ensemble_name,
        args.ensembles_config.as_deref(),
        args.data_root.as_deref(),
    )?;

    let dir = spec.variable_dir(&args.data_freq, &args.scan_variable);
    let cases = generate_case_names(&dir, &CaseNamePattern::default())?;
    let grouped = combine_split_cases(&cases, spec.grouping, DEFAULT_DELIMITER);

    write_casenames(&args.casenames_file, &grouped)?;
    tracing::info!(
        "{} case names saved to {}",
        grouped.len(),
        args.casenames_file.display()
    );
    Ok(grouped)
}

/// Run an analysis.
pub fn cmd_analyze(args: &AnalyzeArgs, verbosity: u32) -> AppResult<RunSummary> {
    let parallel = parse_flag("parallel", &args.parallel)?;
    let testing_mode = parse_flag("testing_mode", &args.testing_mode)?;
    let scheduler: Scheduler = args.job_scheduler.parse()?;

    let ensemble = resolve_ensemble(
        &args.ensemble_name,
        args.ensembles_config.as_deref(),
        args.data_root.as_deref(),
    )?;

    let options = AnalysisOptions {
        casenames_file: args.casenames_file.clone(),
        data_freq: args.data_freq.clone(),
        ensemble,
        target: SaveTarget {
            save_path: args.save_path.clone(),
            save_name: args.save_name.clone(),
        },
        parallel,
        testing_mode,
        scheduler,
        cluster: args.cluster.to_config(),
        user: args.user.clone(),
        analysis: args.analysis.clone(),
        verbosity,
    };

    let summary = run_analysis(&options)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(summary)
}

/// List supported ensembles.
pub fn cmd_ensembles(ensembles_config: Option<&Path>, json: bool) -> AppResult<Vec<EnsembleSpec>> {
    let registry = load_registry(ensembles_config)?;
    let specs: Vec<EnsembleSpec> = registry.iter().cloned().collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&specs)?);
    } else {
        for spec in &specs {
            println!("{:<12} {}", spec.name, spec.data_root.display());
        }
    }
    Ok(specs)
}

/// Write a PBS job script wrapping `ensemble analyze`.
pub fn cmd_submit(args: &SubmitArgs, verbosity: u32) -> AppResult<PathBuf> {
    let config = args.cluster.to_config();

    let program = std::env::current_exe()
        .ok()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "ensemble".to_string());
    let mut command = vec![program, format!("--verbose={verbosity}"), "analyze".to_string()];
    command.extend(args.analyze_args.iter().cloned());
    if !args
        .analyze_args
        .iter()
        .any(|a| a.starts_with("--job-scheduler") || a.starts_with("--job_scheduler"))
    {
        command.push("--job-scheduler".to_string());
        command.push(Scheduler::Pbs.as_str().to_string());
    }

    let script = render_pbs_script(&config, &args.job_name, &command);
    if let Some(parent) = args.script.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;
    }
    std::fs::write(&args.script, script).map_err(|e| AppError::io(&args.script, e))?;

    tracing::info!("Job script written to {}", args.script.display());
    tracing::info!("Submit with: qsub {}", args.script.display());
    Ok(args.script.clone())
}
