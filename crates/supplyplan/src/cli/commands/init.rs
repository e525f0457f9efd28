use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{emit, open_store, plan_failure};
use crate::catalog;
use crate::config::RuntimePaths;
use crate::models::Envelope;
use crate::sqlite::SQLITE_SCHEMA_VERSION;

const COMMAND: &str = "init";

#[derive(Debug, Clone, Args)]
pub struct InitArgs {}

pub fn run(_args: &InitArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let store = open_store(COMMAND, runtime_paths)?;
    let catalog =
        catalog::describe(store.connection()).map_err(|error| plan_failure(COMMAND, &error))?;

    emit(
        &Envelope::ok(
            COMMAND,
            json!({
                "database_path": runtime_paths.database_path.display().to_string(),
                "tables": catalog.allowed_tables(),
            }),
        )
        .with_meta("sqlite_schema_version", json!(SQLITE_SCHEMA_VERSION)),
    )
}
