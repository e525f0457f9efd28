use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::commands::{
    diff::DiffArgs, init::InitArgs, query::QueryArgs, risks::RisksArgs, runs::RunsArgs,
    save::SaveArgs, simulate::SimulateArgs,
};
use crate::config::DATABASE_ENV_VAR;
use crate::telemetry::DEFAULT_LOG_LEVEL;

#[derive(Debug, Parser)]
#[command(
    name = "supplyplan",
    version,
    about = "Planning-run store with a SQL safety gate and what-if simulation"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    #[arg(long, global = true, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH", env = DATABASE_ENV_VAR)]
    pub database: Option<PathBuf>,

    /// Tracing filter used when `SUPPLYPLAN_LOG` is unset.
    #[arg(long, global = true, value_name = "FILTER", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Init(InitArgs),
    Save(SaveArgs),
    Runs(RunsArgs),
    Query(QueryArgs),
    Simulate(SimulateArgs),
    Diff(DiffArgs),
    Risks(RisksArgs),
    /// Print the JSON schema accepted by `save --input`.
    AnalysisSchema,
}
