use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;

use super::{emit, open_store, plan_failure};
use crate::catalog;
use crate::config::RuntimePaths;
use crate::guard::{self, MAX_ROW_LIMIT};
use crate::models::Envelope;

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    #[command(subcommand)]
    pub command: QueryCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum QueryCommand {
    /// Run a read-only SELECT through the safety gate.
    Sql(QuerySqlArgs),
    /// Describe the queryable tables and views.
    Schema,
}

#[derive(Debug, Clone, Args)]
pub struct QuerySqlArgs {
    #[arg(value_name = "SQL")]
    pub sql: String,
}

pub fn run(args: &QueryArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    match &args.command {
        QueryCommand::Sql(sql_args) => run_sql_query(sql_args, runtime_paths),
        QueryCommand::Schema => run_schema_query(runtime_paths),
    }
}

fn run_sql_query(args: &QuerySqlArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    const COMMAND: &str = "query.sql";
    let store = open_store(COMMAND, runtime_paths)?;

    let started = std::time::Instant::now();
    let result =
        guard::execute_gated(&store, &args.sql).map_err(|error| plan_failure(COMMAND, &error))?;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let mut envelope = Envelope::ok(
        COMMAND,
        json!({ "columns": result.columns, "rows": result.rows }),
    )
    .with_meta("guardrail_checked", json!(true))
    .with_meta("row_count", json!(result.row_count))
    .with_meta("truncated", json!(result.truncated))
    .with_meta("row_cap", json!(MAX_ROW_LIMIT))
    .with_meta("duration_ms", json!(duration_ms));
    if result.truncated {
        envelope = envelope.with_warning(
            "rows_truncated",
            format!("result truncated at {MAX_ROW_LIMIT} rows"),
            None,
        );
    }

    emit(&envelope)
}

fn run_schema_query(runtime_paths: &RuntimePaths) -> Result<()> {
    const COMMAND: &str = "query.schema";
    let store = open_store(COMMAND, runtime_paths)?;
    let catalog =
        catalog::describe(store.connection()).map_err(|error| plan_failure(COMMAND, &error))?;

    let (tables, views): (Vec<_>, Vec<_>) = catalog
        .objects()
        .iter()
        .partition(|object| object.kind == "table");
    let table_count = tables.len();
    let view_count = views.len();

    emit(
        &Envelope::ok(
            COMMAND,
            json!({
                "tables": tables,
                "views": views,
                "schema_text": catalog.schema_text(),
            }),
        )
        .with_meta("table_count", json!(table_count))
        .with_meta("view_count", json!(view_count))
        .with_meta("object_count", json!(table_count + view_count)),
    )
}
