#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use clap::error::ErrorKind;
use supplyplan::cli::app::{Cli, Command, RuntimeArgs};
use supplyplan::cli::commands;
use supplyplan::config::RuntimePaths;
use supplyplan::models::EnvelopeFailure;
use tracing::{error, info};

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_VALIDATION_FAILURE: i32 = 2;
const EXIT_SAFETY_REJECTED: i32 = 3;
const EXIT_USAGE_ERROR: i32 = 64;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    supplyplan::telemetry::init_tracing(&cli.runtime.log_level);

    let command_name = command_name(&cli.command);
    info!(command = command_name, "starting");

    match execute(cli) {
        Ok(()) => {
            info!(command = command_name, exit_code = EXIT_SUCCESS, "completed");
            EXIT_SUCCESS
        }
        Err(failure) => {
            let exit_code = classify_runtime_error(&failure);
            error!(command = command_name, exit_code, "failed");
            match failure.downcast_ref::<EnvelopeFailure>() {
                Some(envelope_failure) => println!("{envelope_failure}"),
                None => eprintln!("{failure:#}"),
            }
            exit_code
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::AnalysisSchema => commands::analysis_schema::run(),
        Command::Init(args) => commands::init::run(&args, &resolve_runtime_paths(&cli.runtime)?),
        Command::Save(args) => commands::save::run(&args, &resolve_runtime_paths(&cli.runtime)?),
        Command::Runs(args) => commands::runs::run(&args, &resolve_runtime_paths(&cli.runtime)?),
        Command::Query(args) => commands::query::run(&args, &resolve_runtime_paths(&cli.runtime)?),
        Command::Simulate(args) => {
            commands::simulate::run(&args, &resolve_runtime_paths(&cli.runtime)?)
        }
        Command::Diff(args) => commands::diff::run(&args, &resolve_runtime_paths(&cli.runtime)?),
        Command::Risks(args) => commands::risks::run(&args, &resolve_runtime_paths(&cli.runtime)?),
    }
}

fn classify_runtime_error(error: &anyhow::Error) -> i32 {
    let Some(failure) = error.downcast_ref::<EnvelopeFailure>() else {
        return EXIT_RUNTIME_FAILURE;
    };
    match failure.error_code() {
        Some("validation_error" | "not_found") => EXIT_VALIDATION_FAILURE,
        Some("safety_rejected") => EXIT_SAFETY_REJECTED,
        _ => EXIT_RUNTIME_FAILURE,
    }
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Init(_) => "init",
        Command::Save(_) => "save",
        Command::Runs(_) => "runs",
        Command::Query(_) => "query",
        Command::Simulate(_) => "simulate",
        Command::Diff(_) => "diff",
        Command::Risks(_) => "risks",
        Command::AnalysisSchema => "analysis-schema",
    }
}

fn resolve_runtime_paths(args: &RuntimeArgs) -> Result<RuntimePaths> {
    let home_dir = match &args.home_dir {
        Some(path) => path.clone(),
        None => std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("HOME is not set; pass --home-dir"))?,
    };

    let cwd = match &args.cwd {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    supplyplan::config::resolve_runtime_paths(&home_dir, &cwd, args.database.as_deref())
}
