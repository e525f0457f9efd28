pub mod analysis_schema;
pub mod diff;
pub mod init;
pub mod query;
pub mod risks;
pub mod runs;
pub mod save;
pub mod simulate;

use std::path::Path;

use anyhow::{Context, Error, Result};

use crate::config::RuntimePaths;
use crate::error::PlanError;
use crate::models::{Envelope, EnvelopeFailure};
use crate::sqlite::RunStore;

/// Opens (and on first use creates) the run store named by `runtime_paths`.
pub(crate) fn open_store(command: &str, runtime_paths: &RuntimePaths) -> Result<RunStore> {
    if let Some(database_dir) = runtime_paths.database_dir() {
        std::fs::create_dir_all(database_dir).with_context(|| {
            format!(
                "failed to create database directory {}",
                database_dir.display()
            )
        })?;
    }
    RunStore::open(&runtime_paths.database_path).map_err(|error| plan_failure(command, &error))
}

pub(crate) fn plan_failure(command: &str, error: &PlanError) -> Error {
    Error::new(EnvelopeFailure::from_plan_error(command, error))
}

pub(crate) fn read_input_file(command: &str, path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|error| {
        plan_failure(
            command,
            &PlanError::validation(format!("failed to read {}: {error}", path.display())),
        )
    })
}

pub(crate) fn emit(envelope: &Envelope) -> Result<()> {
    let encoded = serde_json::to_string(envelope).context("failed to encode command envelope")?;
    println!("{encoded}");
    Ok(())
}
