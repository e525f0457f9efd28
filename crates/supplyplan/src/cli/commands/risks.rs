use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{emit, open_store, plan_failure};
use crate::config::RuntimePaths;
use crate::models::Envelope;
use crate::risk;

const COMMAND: &str = "risks";

#[derive(Debug, Clone, Args)]
pub struct RisksArgs {
    /// Defaults to the most recent run.
    #[arg(long, value_name = "RUN_ID")]
    pub run_id: Option<String>,
}

pub fn run(args: &RisksArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let store = open_store(COMMAND, runtime_paths)?;
    let report = risk::briefing(&store, args.run_id.as_deref())
        .map_err(|error| plan_failure(COMMAND, &error))?;

    emit(&Envelope::ok(COMMAND, json!(report)).with_meta("risk_count", json!(report.risks.len())))
}
