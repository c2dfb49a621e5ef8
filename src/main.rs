//! CLI Entry Point for dtest
//!
//! ```bash
//! dtest suite.rhai
//! ```
//!
//! Exit status is 0 when the script completes and the suite's exit code is
//! zero, 1 on any failure or a nonzero suite exit code. `--help` and
//! `--version` exit 0; any other argument error prints usage and exits 1.

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use dtest::{config::DtestConfig, driver, logging};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "dtest", version)]
#[command(about = "Run a distributed test script", long_about = None)]
struct Cli {
    /// Path to the .rhai test script
    script: PathBuf,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    match run(&cli) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("dtest: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let config = DtestConfig::load().context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    driver::run_script(&cli.script, &config)
}
