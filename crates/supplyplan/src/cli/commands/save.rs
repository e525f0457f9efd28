use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{emit, open_store, plan_failure, read_input_file};
use crate::config::RuntimePaths;
use crate::error::PlanError;
use crate::models::{Envelope, RunAnalysis};

const COMMAND: &str = "save";

#[derive(Debug, Clone, Args)]
pub struct SaveArgs {
    #[arg(long, value_name = "ID")]
    pub run_id: String,

    /// JSON analysis payload; see `analysis-schema`.
    #[arg(long, value_name = "FILE")]
    pub input: PathBuf,

    #[arg(long)]
    pub notes: Option<String>,
}

pub fn run(args: &SaveArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let raw = read_input_file(COMMAND, &args.input)?;
    let analysis = serde_json::from_str::<RunAnalysis>(&raw).map_err(|error| {
        plan_failure(
            COMMAND,
            &PlanError::validation(format!("invalid analysis payload: {error}")),
        )
    })?;

    let mut store = open_store(COMMAND, runtime_paths)?;
    let stats = store
        .save_run(&args.run_id, &analysis, args.notes.as_deref())
        .map_err(|error| plan_failure(COMMAND, &error))?;

    emit(
        &Envelope::ok(COMMAND, json!(stats))
            .with_meta("input", json!(args.input.display().to_string())),
    )
}
