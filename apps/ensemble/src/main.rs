//! Ensemble post-processing binary.
//!
//! ```bash
//! # Write the case names of an ensemble
//! ensemble casenames --data-freq month_1 --casenames-file cases.txt --ensemble-name CESM2-LE
//!
//! # Run the cloud radiative effect analysis on two members, in serial
//! ensemble analyze --casenames-file cases.txt --data-freq month_1 --ensemble-name CESM2-LE \
//!     --save-path out --save-name cre --parallel FALSE --testing-mode TRUE
//! ```

use clap::Parser;
use ensemble::cli::{Cli, run};
use ensemble::logging::init_logging;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.log_format) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            tracing::error!("EXITING");
            ExitCode::FAILURE
        }
    }
}
