use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{emit, open_store, plan_failure, read_input_file};
use crate::config::RuntimePaths;
use crate::models::Envelope;
use crate::scenario::{self, ScenarioRequest};

const COMMAND: &str = "simulate";

#[derive(Debug, Clone, Args)]
pub struct SimulateArgs {
    /// Baseline run; defaults to the most recent run.
    #[arg(long, value_name = "RUN_ID")]
    pub baseline: Option<String>,

    #[arg(long = "multiplier", value_name = "SKU=FACTOR", value_parser = parse_key_factor)]
    pub multipliers: Vec<(String, f64)>,

    #[arg(long = "cap", value_name = "MATERIAL=KG", value_parser = parse_key_factor)]
    pub caps: Vec<(String, f64)>,

    /// JSON scenario request; flags are layered on top of it.
    #[arg(long, value_name = "FILE")]
    pub request: Option<PathBuf>,
}

impl SimulateArgs {
    pub fn scenario_request(&self) -> Result<ScenarioRequest> {
        let mut request = match &self.request {
            Some(path) => {
                let raw = read_input_file(COMMAND, path)?;
                ScenarioRequest::from_json(&raw).map_err(|error| plan_failure(COMMAND, &error))?
            }
            None => ScenarioRequest::default(),
        };

        if let Some(baseline) = &self.baseline {
            request.baseline_run_id = Some(baseline.clone());
        }
        request
            .demand_multipliers
            .extend(self.multipliers.iter().cloned());
        request.material_caps.extend(self.caps.iter().cloned());
        Ok(request)
    }
}

pub fn run(args: &SimulateArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let request = args.scenario_request()?;
    let mut store = open_store(COMMAND, runtime_paths)?;
    let outcome =
        scenario::simulate(&mut store, &request).map_err(|error| plan_failure(COMMAND, &error))?;

    let mut envelope = Envelope::ok(COMMAND, json!(outcome))
        .with_meta("multiplier_count", json!(request.demand_multipliers.len()))
        .with_meta("cap_count", json!(request.material_caps.len()));
    if !outcome.ignored_multipliers.is_empty() {
        envelope = envelope.with_warning(
            "unmatched_multipliers",
            "some multiplier SKUs matched no forecast row",
            Some(json!(outcome.ignored_multipliers)),
        );
    }
    if !outcome.ignored_caps.is_empty() {
        envelope = envelope.with_warning(
            "unmatched_caps",
            "some cap materials matched no order row",
            Some(json!(outcome.ignored_caps)),
        );
    }

    emit(&envelope)
}

/// Parses `KEY=NUMBER`. Range checks are left to the scenario engine.
pub fn parse_key_factor(raw: &str) -> std::result::Result<(String, f64), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=NUMBER, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in `{raw}`"));
    }
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|error| format!("invalid number in `{raw}`: {error}"))?;
    Ok((key.to_string(), value))
}
