use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;

use super::{emit, open_store, plan_failure};
use crate::config::RuntimePaths;
use crate::error::PlanError;
use crate::models::Envelope;

#[derive(Debug, Clone, Args)]
pub struct RunsArgs {
    #[command(subcommand)]
    pub command: RunsCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum RunsCommand {
    /// Newest first.
    List,
    Show(RunIdArgs),
    Delete(RunIdArgs),
    Latest,
}

#[derive(Debug, Clone, Args)]
pub struct RunIdArgs {
    #[arg(value_name = "RUN_ID")]
    pub run_id: String,
}

pub fn run(args: &RunsArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    match &args.command {
        RunsCommand::List => list_runs(runtime_paths),
        RunsCommand::Show(show_args) => show_run(show_args, runtime_paths),
        RunsCommand::Delete(delete_args) => delete_run(delete_args, runtime_paths),
        RunsCommand::Latest => latest_run(runtime_paths),
    }
}

fn list_runs(runtime_paths: &RuntimePaths) -> Result<()> {
    const COMMAND: &str = "runs.list";
    let store = open_store(COMMAND, runtime_paths)?;
    let runs = store
        .list_runs()
        .map_err(|error| plan_failure(COMMAND, &error))?;

    emit(&Envelope::ok(COMMAND, json!({ "runs": runs })).with_meta("run_count", json!(runs.len())))
}

fn show_run(args: &RunIdArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    const COMMAND: &str = "runs.show";
    let store = open_store(COMMAND, runtime_paths)?;
    let snapshot = store
        .load_snapshot(&args.run_id)
        .map_err(|error| plan_failure(COMMAND, &error))?;

    emit(
        &Envelope::ok(COMMAND, json!(snapshot))
            .with_meta("forecast_count", json!(snapshot.forecasts.len()))
            .with_meta("production_plan_count", json!(snapshot.production_plans.len()))
            .with_meta(
                "raw_material_order_count",
                json!(snapshot.raw_material_orders.len()),
            )
            .with_meta("risk_alert_count", json!(snapshot.risk_alerts.len())),
    )
}

fn delete_run(args: &RunIdArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    const COMMAND: &str = "runs.delete";
    let store = open_store(COMMAND, runtime_paths)?;
    let removed = store
        .delete_run(&args.run_id)
        .map_err(|error| plan_failure(COMMAND, &error))?;
    if !removed {
        return Err(plan_failure(
            COMMAND,
            &PlanError::not_found(format!("run `{}` does not exist", args.run_id)),
        ));
    }

    emit(&Envelope::ok(
        COMMAND,
        json!({ "run_id": args.run_id, "deleted": true }),
    ))
}

fn latest_run(runtime_paths: &RuntimePaths) -> Result<()> {
    const COMMAND: &str = "runs.latest";
    let store = open_store(COMMAND, runtime_paths)?;
    let run = store
        .latest_run()
        .map_err(|error| plan_failure(COMMAND, &error))?
        .ok_or_else(|| plan_failure(COMMAND, &PlanError::not_found("no runs exist")))?;

    emit(&Envelope::ok(COMMAND, json!(run)))
}
