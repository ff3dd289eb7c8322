//! Integration tests for the ensemble CLI commands.
//!
//! Every test builds a small time-series tree in a temp directory:
//! `<root>/month_1/<VAR>/<case file>.nc`, one file per variable per chunk.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use clap::Parser;
use ensemble::cli::{
    AnalyzeArgs, CasenamesArgs, Cli, ClusterArgs, Commands, SubmitArgs, cmd_analyze,
    cmd_casenames, cmd_ensembles, cmd_submit,
};
use ensemble::cluster::Scheduler;
use ensemble::config::{ClusterConfig, SaveTarget};
use ensemble::pipeline::{AnalysisOptions, run_analysis_with};
use ensemble::save::{DatasetWriter, NetcdfWriter, SaveReport};
use ensemble::{AppError, AppResult};
use ensemble_core::formats::{read_dataset, write_dataset};
use ensemble_core::{
    AttrValue, CaseGrouping, Dataset, Dimension, ENSEMBLE_MEMBER_DIM, EnsembleRegistry, Values,
    Variable, member_names,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const FLUXES: [(&str, f32); 4] = [("FLNT", 240.0), ("FLNTC", 270.0), ("FSNT", 230.0), ("FSNTC", 280.0)];

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn create_temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Write one chunk of every flux variable for a case.
///
/// `offset` is added to FLNT and FSNT, so a member's LWCRE is
/// `offset - 30` and its SWCRE is `offset - 50`.
fn write_case(root: &Path, case: &str, t0: f64, offset: f32) {
    for (variable, base) in FLUXES {
        let dir = root.join("month_1").join(variable);
        std::fs::create_dir_all(&dir).unwrap();

        let mut ds = Dataset::new();
        ds.add_dim(Dimension::unlimited("time", 2)).unwrap();
        ds.add_dim(Dimension::new("lat", 3)).unwrap();
        ds.add_variable(
            "time",
            Variable::new(["time"], Values::Double(vec![t0, t0 + 1.0]))
                .with_attr("units", AttrValue::text("days since 1850-01-01 00:00:00")),
        )
        .unwrap();
        ds.add_variable(
            "lat",
            Variable::new(["lat"], Values::Double(vec![-45.0, 0.0, 45.0])),
        )
        .unwrap();
        ds.add_variable(
            "date_written",
            Variable::new(
                ["time"],
                Values::Str(vec!["01/02/21".to_string(), "01/02/21".to_string()]),
            ),
        )
        .unwrap();
        let shift = if variable.ends_with('C') { 0.0 } else { offset };
        ds.add_variable(
            variable,
            Variable::new(["time", "lat"], Values::Float(vec![base + shift; 6]))
                .with_attr("units", AttrValue::text("W/m2")),
        )
        .unwrap();
        ds.set_attr("case", AttrValue::text(case));

        let file = format!("b.e21.BHISTcmip6.f09_g17.{case}.cam.h0.{variable}.{t0:04}.nc");
        write_dataset(&dir.join(file), &ds).unwrap();
    }
}

/// A CESM2-LE style tree with three members, two time chunks each.
fn create_le_tree(dir: &TempDir) -> PathBuf {
    let root = dir.path().join("tseries");
    for (i, case) in ["LE2-1001.001", "LE2-1011.001", "LE2-1021.002"].iter().enumerate() {
        let offset = i as f32 * 10.0;
        write_case(&root, case, 0.0, offset);
        write_case(&root, case, 2.0, offset);
    }
    root
}

fn analyze_args(root: &Path, casenames: &Path, save_path: &Path) -> AnalyzeArgs {
    AnalyzeArgs {
        casenames_file: casenames.to_path_buf(),
        data_freq: "month_1".to_string(),
        ensemble_name: "cesm2-le".to_string(),
        save_path: save_path.to_path_buf(),
        save_name: "cre".to_string(),
        parallel: "FALSE".to_string(),
        testing_mode: "FALSE".to_string(),
        job_scheduler: "LOCAL".to_string(),
        user: None,
        analysis: "cre".to_string(),
        data_root: Some(root.to_path_buf()),
        ensembles_config: None,
        json: false,
        cluster: ClusterArgs::default(),
    }
}

fn write_casenames_for(root: &Path, dir: &TempDir, ensemble: &str) -> PathBuf {
    let casenames = dir.path().join("cases.txt");
    cmd_casenames(&CasenamesArgs {
        data_freq: "month_1".to_string(),
        casenames_file: casenames.clone(),
        ensemble_name: ensemble.to_string(),
        scan_variable: "FLNT".to_string(),
        data_root: Some(root.to_path_buf()),
        ensembles_config: None,
    })
    .unwrap();
    casenames
}

// =============================================================================
// CASENAMES COMMAND TESTS
// =============================================================================

#[test]
fn test_casenames_writes_sorted_unique_cases() {
    let temp = create_temp_dir();
    let root = create_le_tree(&temp);
    let casenames = write_casenames_for(&root, &temp, "CESM2-LE");

    let content = std::fs::read_to_string(&casenames).unwrap();
    assert_eq!(content, "LE2-1001.001\nLE2-1011.001\nLE2-1021.002\n");
}

#[test]
fn test_casenames_groups_split_forcing_cases() {
    let temp = create_temp_dir();
    let root = temp.path().join("sf");
    write_case(&root, "e21.BHISTcmip6.GHG.001", 0.0, 0.0);
    write_case(&root, "e21.BSSP370.GHG.001", 2.0, 0.0);
    write_case(&root, "e21.BHISTcmip6.xAER.001", 0.0, 0.0);

    let casenames = write_casenames_for(&root, &temp, "cesm2-sf");

    let content = std::fs::read_to_string(&casenames).unwrap();
    assert_eq!(
        content,
        "e21.BHISTcmip6.GHG.001&&e21.BSSP370.GHG.001\ne21.BHISTcmip6.xAER.001\n"
    );
}

#[test]
fn test_casenames_rejects_unknown_ensemble() {
    let temp = create_temp_dir();
    let result = cmd_casenames(&CasenamesArgs {
        data_freq: "month_1".to_string(),
        casenames_file: temp.path().join("cases.txt"),
        ensemble_name: "E3SM-LE".to_string(),
        scan_variable: "FLNT".to_string(),
        data_root: None,
        ensembles_config: None,
    });

    let message = result.unwrap_err().to_string();
    assert!(message.contains("E3SM-LE"));
    assert!(message.contains("CESM2-SF"));
    assert!(!temp.path().join("cases.txt").exists());
}

// =============================================================================
// ANALYZE COMMAND TESTS
// =============================================================================

#[test]
fn test_analyze_serial_writes_combined_file() {
    let temp = create_temp_dir();
    let root = create_le_tree(&temp);
    let casenames = write_casenames_for(&root, &temp, "CESM2-LE");
    let save_path = temp.path().join("out");

    let summary = cmd_analyze(&analyze_args(&root, &casenames, &save_path), 20).unwrap();

    let expected = save_path.join("CESM2-LE_cre_3_ens_members.nc");
    assert_eq!(summary.save, SaveReport::Combined { path: expected.clone() });
    assert_eq!(summary.members.len(), 3);
    assert!(!summary.parallel);

    let ds = read_dataset(&expected).unwrap();
    assert_eq!(
        member_names(&ds, ENSEMBLE_MEMBER_DIM).unwrap(),
        vec!["LE2-1001.001", "LE2-1011.001", "LE2-1021.002"]
    );
    assert_eq!(ds.dim_len("time"), Some(4));
    assert!(ds.variable("date_written").is_none());
    assert_eq!(ds.variable("time").unwrap().text_attr("calendar"), Some("noleap"));

    let lwcre = ds.variable("LWCRE").unwrap();
    assert_eq!(lwcre.dims, vec!["ensemble_member", "time", "lat"]);
    let Values::Float(values) = &lwcre.values else {
        panic!("LWCRE should stay float");
    };
    assert_eq!(values.len(), 3 * 4 * 3);
    assert_eq!(values[0], -30.0);
    assert_eq!(values[12], -20.0);
    assert_eq!(values[35], -10.0);
    assert_eq!(lwcre.text_attr("units"), Some("W/m2"));
}

#[test]
fn test_analyze_parallel_matches_serial() {
    let temp = create_temp_dir();
    let root = create_le_tree(&temp);
    let casenames = write_casenames_for(&root, &temp, "CESM2-LE");

    let serial_out = temp.path().join("serial");
    cmd_analyze(&analyze_args(&root, &casenames, &serial_out), 20).unwrap();

    let parallel_out = temp.path().join("parallel");
    let mut args = analyze_args(&root, &casenames, &parallel_out);
    args.parallel = "true".to_string();
    args.cluster.workers = Some(2);
    let summary = cmd_analyze(&args, 20).unwrap();
    assert!(summary.parallel);
    assert_eq!(summary.workers, 2);

    let name = "CESM2-LE_cre_3_ens_members.nc";
    let serial = read_dataset(&serial_out.join(name)).unwrap();
    let parallel = read_dataset(&parallel_out.join(name)).unwrap();
    assert_eq!(serial, parallel);
}

#[test]
fn test_analyze_testing_mode_keeps_two_members() {
    let temp = create_temp_dir();
    let root = create_le_tree(&temp);
    let casenames = write_casenames_for(&root, &temp, "CESM2-LE");
    let save_path = temp.path().join("out");

    let mut args = analyze_args(&root, &casenames, &save_path);
    args.testing_mode = "TRUE".to_string();
    let summary = cmd_analyze(&args, 20).unwrap();

    assert_eq!(summary.members, vec!["LE2-1001.001", "LE2-1011.001"]);
    assert!(save_path.join("CESM2-LE_cre_2_ens_members.nc").exists());
}

#[test]
fn test_analyze_repeated_case_names_are_analyzed_once() {
    let temp = create_temp_dir();
    let root = create_le_tree(&temp);
    let casenames = temp.path().join("cases.txt");
    std::fs::write(&casenames, "LE2-1001.001\nLE2-1011.001\nLE2-1001.001\n").unwrap();
    let save_path = temp.path().join("out");

    let summary = cmd_analyze(&analyze_args(&root, &casenames, &save_path), 20).unwrap();

    assert_eq!(summary.members, vec!["LE2-1001.001", "LE2-1011.001"]);
    let ds = read_dataset(&save_path.join("CESM2-LE_cre_2_ens_members.nc")).unwrap();
    assert_eq!(
        member_names(&ds, ENSEMBLE_MEMBER_DIM).unwrap(),
        vec!["LE2-1001.001", "LE2-1011.001"]
    );
}

#[test]
fn test_analyze_grouped_member_spans_both_experiments() {
    let temp = create_temp_dir();
    let root = temp.path().join("sf");
    write_case(&root, "e21.BHISTcmip6.GHG.001", 0.0, 5.0);
    write_case(&root, "e21.BSSP370.GHG.001", 2.0, 5.0);
    write_case(&root, "e21.BHISTcmip6.GHG.002", 0.0, 7.0);
    write_case(&root, "e21.BSSP370.GHG.002", 2.0, 7.0);
    let casenames = write_casenames_for(&root, &temp, "CESM2-SF");
    let save_path = temp.path().join("out");

    let mut args = analyze_args(&root, &casenames, &save_path);
    args.ensemble_name = "CESM2-SF".to_string();
    let summary = cmd_analyze(&args, 5).unwrap();

    assert_eq!(summary.members.len(), 2);
    let ds = read_dataset(&save_path.join("CESM2-SF_cre_2_ens_members.nc")).unwrap();
    assert_eq!(ds.dim_len("time"), Some(4));
    assert_eq!(
        ds.variable("time").unwrap().values,
        Values::Double(vec![0.0, 1.0, 2.0, 3.0])
    );
}

#[test]
fn test_analyze_rejects_bad_parallel_flag() {
    let temp = create_temp_dir();
    let root = create_le_tree(&temp);
    let casenames = write_casenames_for(&root, &temp, "CESM2-LE");

    let mut args = analyze_args(&root, &casenames, &temp.path().join("out"));
    args.parallel = "sometimes".to_string();

    let err = cmd_analyze(&args, 20).unwrap_err();
    assert!(matches!(err, AppError::InvalidFlag { ref flag, .. } if flag == "parallel"));
    assert!(!temp.path().join("out").exists());
}

#[test]
fn test_analyze_rejects_unknown_scheduler() {
    let temp = create_temp_dir();
    let root = create_le_tree(&temp);
    let casenames = write_casenames_for(&root, &temp, "CESM2-LE");

    let mut args = analyze_args(&root, &casenames, &temp.path().join("out"));
    args.parallel = "TRUE".to_string();
    args.job_scheduler = "slurm".to_string();

    assert!(matches!(
        cmd_analyze(&args, 20),
        Err(AppError::UnsupportedScheduler { .. })
    ));
}

#[test]
fn test_analyze_missing_variable_directory_fails() {
    let temp = create_temp_dir();
    let root = create_le_tree(&temp);
    let casenames = write_casenames_for(&root, &temp, "CESM2-LE");
    std::fs::remove_dir_all(root.join("month_1").join("FSNTC")).unwrap();

    let result = cmd_analyze(&analyze_args(&root, &casenames, &temp.path().join("out")), 20);
    assert!(matches!(result, Err(AppError::Core(_))));
}

// =============================================================================
// SAVE FALLBACK THROUGH THE PIPELINE
// =============================================================================

/// Refuses the combined file, writes members normally.
struct NoCombinedWriter;

impl DatasetWriter for NoCombinedWriter {
    fn write(&self, path: &Path, dataset: &Dataset) -> AppResult<()> {
        if path.to_string_lossy().ends_with("_ens_members.nc") {
            std::fs::write(path, b"CDF\x01partial").unwrap();
            return Err(AppError::Cluster("combined write refused".to_string()));
        }
        NetcdfWriter.write(path, dataset)
    }
}

#[test]
fn test_pipeline_falls_back_to_member_files() {
    let temp = create_temp_dir();
    let root = create_le_tree(&temp);
    let casenames = write_casenames_for(&root, &temp, "CESM2-LE");
    let save_path = temp.path().join("out");

    let registry = EnsembleRegistry::builtin();
    let mut ensemble = registry.get("CESM2-LE").unwrap().clone();
    ensemble.data_root = root;
    assert_eq!(ensemble.grouping, CaseGrouping::None);

    let options = AnalysisOptions {
        casenames_file: casenames,
        data_freq: "month_1".to_string(),
        ensemble,
        target: SaveTarget {
            save_path: save_path.clone(),
            save_name: "cre".to_string(),
        },
        parallel: true,
        testing_mode: false,
        scheduler: Scheduler::Local,
        cluster: ClusterConfig {
            workers: Some(3),
            ..ClusterConfig::default()
        },
        user: None,
        analysis: "cre".to_string(),
        verbosity: 20,
    };

    let summary = run_analysis_with(&options, &NoCombinedWriter).unwrap();

    assert!(!save_path.join("CESM2-LE_cre_3_ens_members.nc").exists());
    let SaveReport::PerMember { dir, saved, failed } = summary.save else {
        panic!("expected per-member save");
    };
    assert_eq!(dir, save_path.join("cre"));
    assert!(failed.is_empty());
    assert_eq!(saved.len(), 3);

    let member = read_dataset(&dir.join("LE2-1011.001_CESM2-LE_cre.nc")).unwrap();
    assert!(member.dim(ENSEMBLE_MEMBER_DIM).is_none());
    assert_eq!(
        member.variable("SWCRE").unwrap().values,
        Values::Float(vec![-40.0; 12])
    );
}

// =============================================================================
// ENSEMBLES AND SUBMIT COMMAND TESTS
// =============================================================================

#[test]
fn test_ensembles_lists_builtin_and_configured() {
    let temp = create_temp_dir();
    let config = temp.path().join("ensembles.json");
    std::fs::write(&config, r#"[{"name": "mini-le", "data_root": "/data/mini"}]"#).unwrap();

    let specs = cmd_ensembles(Some(&config), true).unwrap();
    let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["CESM2-LE", "CESM2-SF", "MINI-LE"]);
}

#[test]
fn test_submit_writes_pbs_script() {
    let temp = create_temp_dir();
    let script = temp.path().join("jobs").join("cre.pbs");

    let args = SubmitArgs {
        script: script.clone(),
        job_name: "cre".to_string(),
        cluster: ClusterArgs {
            project: Some("P0000001".to_string()),
            walltime: Some("06:00:00".to_string()),
            ..ClusterArgs::default()
        },
        analyze_args: vec![
            "--ensemble-name".to_string(),
            "CESM2-LE".to_string(),
            "--save-name".to_string(),
            "cre".to_string(),
        ],
    };
    let written = cmd_submit(&args, 20).unwrap();
    assert_eq!(written, script);

    let content = std::fs::read_to_string(&script).unwrap();
    assert!(content.contains("#PBS -N cre"));
    assert!(content.contains("#PBS -A P0000001"));
    assert!(content.contains("#PBS -l walltime=06:00:00"));
    assert!(content.contains("#PBS -q casper"));
    assert!(content.contains("analyze --ensemble-name CESM2-LE --save-name cre --job-scheduler PBS"));
}

#[test]
fn test_submit_requests_memory_and_cores() {
    let temp = create_temp_dir();
    let script = temp.path().join("cre.pbs");

    let cli = Cli::try_parse_from([
        "ensemble",
        "submit",
        "--script",
        script.to_str().unwrap(),
        "--memory",
        "256GB",
        "--cores",
        "12",
        "--",
        "--ensemble-name",
        "CESM2-LE",
    ])
    .unwrap();
    let Commands::Submit(args) = cli.command else {
        panic!("expected submit");
    };
    cmd_submit(&args, 20).unwrap();

    let content = std::fs::read_to_string(&script).unwrap();
    assert!(content.contains("#PBS -l select=1:ncpus=12:mem=256GB"));
}

// =============================================================================
// ARGUMENT PARSING TESTS
// =============================================================================

#[test]
fn test_verbose_defaults_and_bare_flag() {
    let cli = Cli::try_parse_from(["ensemble", "ensembles"]).unwrap();
    assert_eq!(cli.verbose, 20);

    let cli = Cli::try_parse_from(["ensemble", "ensembles", "--verbose"]).unwrap();
    assert_eq!(cli.verbose, 10);

    let cli = Cli::try_parse_from(["ensemble", "ensembles", "--verbose", "5"]).unwrap();
    assert_eq!(cli.verbose, 5);
}

#[test]
fn test_underscore_flag_spellings_are_accepted() {
    let cli = Cli::try_parse_from([
        "ensemble",
        "analyze",
        "--casenames_file",
        "cases.txt",
        "--data_freq",
        "month_1",
        "--ensemble_name",
        "CESM2-LE",
        "--save_path",
        "out",
        "--save_name",
        "cre",
        "--testing_mode",
        "TRUE",
    ])
    .unwrap();

    let Commands::Analyze(args) = cli.command else {
        panic!("expected analyze");
    };
    assert_eq!(args.casenames_file, PathBuf::from("cases.txt"));
    assert_eq!(args.parallel, "TRUE");
    assert_eq!(args.testing_mode, "TRUE");
    assert_eq!(args.job_scheduler, "LOCAL");
}
