use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{emit, open_store, plan_failure};
use crate::config::RuntimePaths;
use crate::diff;
use crate::models::Envelope;

const COMMAND: &str = "diff";

#[derive(Debug, Clone, Args)]
pub struct DiffArgs {
    #[arg(value_name = "BASE_RUN_ID")]
    pub base_run_id: String,

    #[arg(value_name = "SCENARIO_RUN_ID")]
    pub scenario_run_id: String,
}

pub fn run(args: &DiffArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let mut store = open_store(COMMAND, runtime_paths)?;
    let run_diff = diff::diff(&mut store, &args.base_run_id, &args.scenario_run_id)
        .map_err(|error| plan_failure(COMMAND, &error))?;

    emit(
        &Envelope::ok(COMMAND, json!(run_diff))
            .with_meta("forecast_keys", json!(run_diff.forecast_delta.len()))
            .with_meta("production_keys", json!(run_diff.production_delta.len()))
            .with_meta("order_keys", json!(run_diff.orders_delta.len())),
    )
}
