mod cli;
mod commands;
mod logging;

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use engine_logging::FacadeLog;
use log::LevelFilter;

use crate::cli::Cli;
use crate::logging::LogDestination;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    logging::initialize(
        LogDestination::from_flags(cli.log_file.as_deref(), cli.verbose),
        level,
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("starting the async runtime")?;
    let mut stdout = io::stdout().lock();
    commands::execute(cli, &runtime, FacadeLog::shared(), &mut stdout)
}
