use std::path::Path;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{PlanError, Result, StorageContext};
use crate::models::{
    Forecast, ProductionPlan, RawMaterialOrder, RiskAlert, Run, RunAnalysis, RunSnapshot,
    validate_run_id,
};
use crate::utils::time::Timestamp;

pub const SQLITE_SCHEMA_VERSION: &str = "supplyplan.sqlite.v1";
pub const RUNS_TABLE: &str = "runs";
pub const FORECASTS_TABLE: &str = "forecasts";
pub const PRODUCTION_PLANS_TABLE: &str = "production_plans";
pub const RAW_MATERIAL_ORDERS_TABLE: &str = "raw_material_orders";
pub const RISK_ALERTS_TABLE: &str = "risk_alerts";
pub const SCHEMA_META_TABLE: &str = "supplyplan_schema_meta";
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_RUNS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id TEXT NOT NULL PRIMARY KEY,
    created_at TEXT NOT NULL,
    created_at_unix_ms INTEGER NOT NULL,
    notes TEXT,
    summary_text TEXT,
    CHECK (length(trim(id)) > 0),
    CHECK (created_at_unix_ms >= 0)
);
"#;

const CREATE_INDEX_RUNS_CREATED_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_runs_created
ON runs (created_at_unix_ms);
"#;

const CREATE_FORECASTS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS forecasts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    sku TEXT NOT NULL,
    forecasted_demand INTEGER NOT NULL,
    confidence_or_reason TEXT,
    UNIQUE (run_id, sku),
    CHECK (length(trim(sku)) > 0),
    CHECK (forecasted_demand >= 0)
);
"#;

const CREATE_PRODUCTION_PLANS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS production_plans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    sku TEXT NOT NULL,
    forecasted_demand INTEGER NOT NULL,
    current_inventory INTEGER NOT NULL,
    suggested_production INTEGER NOT NULL,
    UNIQUE (run_id, sku),
    CHECK (length(trim(sku)) > 0),
    CHECK (forecasted_demand >= 0),
    CHECK (current_inventory >= 0),
    CHECK (suggested_production >= 0)
);
"#;

const CREATE_RAW_MATERIAL_ORDERS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS raw_material_orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    material_id TEXT NOT NULL,
    needed_qty_kg REAL NOT NULL,
    current_stock_kg REAL NOT NULL,
    suggested_order_kg REAL NOT NULL,
    UNIQUE (run_id, material_id),
    CHECK (length(trim(material_id)) > 0),
    CHECK (needed_qty_kg >= 0),
    CHECK (current_stock_kg >= 0),
    CHECK (suggested_order_kg >= 0)
);
"#;

const CREATE_RISK_ALERTS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS risk_alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    alert_type TEXT NOT NULL,
    sku_or_material TEXT,
    description TEXT NOT NULL,
    CHECK (length(trim(alert_type)) > 0)
);
"#;

const CREATE_INDEX_RISK_ALERTS_RUN_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_risk_alerts_run_type
ON risk_alerts (run_id, alert_type);
"#;

const CREATE_META_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS supplyplan_schema_meta (
    schema_version TEXT NOT NULL,
    applied_at_utc TEXT NOT NULL
);
"#;

#[must_use]
pub fn schema_statements() -> &'static [&'static str] {
    &[
        CREATE_RUNS_TABLE_SQL,
        CREATE_INDEX_RUNS_CREATED_SQL,
        CREATE_FORECASTS_TABLE_SQL,
        CREATE_PRODUCTION_PLANS_TABLE_SQL,
        CREATE_RAW_MATERIAL_ORDERS_TABLE_SQL,
        CREATE_RISK_ALERTS_TABLE_SQL,
        CREATE_INDEX_RISK_ALERTS_RUN_SQL,
        CREATE_META_TABLE_SQL,
    ]
}

#[must_use]
pub fn create_schema_sql() -> String {
    schema_statements().join("\n")
}

pub fn ensure_sqlite_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(&create_schema_sql())
        .storage_context("failed to create sqlite schema")?;

    if schema_meta_has_version(connection, SQLITE_SCHEMA_VERSION)? {
        return Ok(());
    }

    connection
        .execute(
            &format!(
                "INSERT INTO {SCHEMA_META_TABLE} (schema_version, applied_at_utc) VALUES (?1, ?2)"
            ),
            params![SQLITE_SCHEMA_VERSION, Timestamp::now().utc_millis()],
        )
        .storage_context("failed to write sqlite schema meta row")?;
    debug!(schema_version = SQLITE_SCHEMA_VERSION, "applied sqlite schema");

    Ok(())
}

fn schema_meta_has_version(connection: &Connection, schema_version: &str) -> Result<bool> {
    let query = format!(
        "SELECT EXISTS(SELECT 1 FROM {SCHEMA_META_TABLE} WHERE schema_version = ?1 LIMIT 1)"
    );
    let exists = connection
        .query_row(&query, [schema_version], |row| row.get::<usize, i64>(0))
        .storage_context("failed to query sqlite schema version metadata")?;
    Ok(exists != 0)
}

/// Counts of rows written by one bulk save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveStats {
    pub run_id: String,
    pub created: bool,
    pub forecasts: usize,
    pub production_plans: usize,
    pub raw_material_orders: usize,
    pub risk_alerts: usize,
}

/// Owned storage handle. One per caller; SQLite serializes writers across handles.
#[derive(Debug)]
pub struct RunStore {
    connection: Connection,
}

impl RunStore {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open(path).with_storage_context(|| {
            format!("failed to open sqlite database: {}", path.display())
        })?;
        Self::from_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().storage_context("failed to open in-memory sqlite")?;
        Self::from_connection(connection)
    }

    pub fn from_connection(connection: Connection) -> Result<Self> {
        connection
            .execute_batch("PRAGMA foreign_keys = ON;")
            .storage_context("failed to enable sqlite foreign keys")?;
        connection
            .busy_timeout(DEFAULT_BUSY_TIMEOUT)
            .storage_context("failed to configure sqlite busy timeout")?;
        ensure_sqlite_schema(&connection)?;
        Ok(Self { connection })
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    pub fn create_run(&self, run_id: &str, notes: Option<&str>) -> Result<Run> {
        validate_run_id(run_id)?;
        let run = new_run(run_id, notes.map(ToString::to_string));
        insert_run(&self.connection, &run)?;
        info!(run_id = %run.id, "created run");
        Ok(run)
    }

    /// Creates the run if needed, then replaces every child row with `analysis`.
    /// Re-saving the same id is idempotent.
    pub fn save_run(
        &mut self,
        run_id: &str,
        analysis: &RunAnalysis,
        notes: Option<&str>,
    ) -> Result<SaveStats> {
        validate_run_id(run_id)?;
        analysis.validate()?;

        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .storage_context("failed to open save transaction")?;

        let created = match find_run(&tx, run_id)? {
            Some(_) => {
                if let Some(notes) = notes {
                    tx.execute(
                        "UPDATE runs SET notes = ?2 WHERE id = ?1",
                        params![run_id, notes],
                    )
                    .with_storage_context(|| format!("failed to update notes for run `{run_id}`"))?;
                }
                false
            }
            None => {
                insert_run(&tx, &new_run(run_id, notes.map(ToString::to_string)))?;
                true
            }
        };

        if let Some(summary_text) = analysis.summary_text.as_deref() {
            tx.execute(
                "UPDATE runs SET summary_text = ?2 WHERE id = ?1",
                params![run_id, summary_text],
            )
            .with_storage_context(|| format!("failed to update summary for run `{run_id}`"))?;
        }

        delete_children(&tx, run_id)?;
        insert_forecasts(&tx, run_id, &analysis.forecast_table)?;
        insert_production_plans(&tx, run_id, &analysis.production_plan)?;
        insert_raw_material_orders(&tx, run_id, &analysis.raw_material_orders)?;
        insert_risk_alerts(&tx, run_id, &analysis.risk_alerts)?;

        tx.commit()
            .with_storage_context(|| format!("failed to commit save for run `{run_id}`"))?;

        let stats = SaveStats {
            run_id: run_id.to_string(),
            created,
            forecasts: analysis.forecast_table.len(),
            production_plans: analysis.production_plan.len(),
            raw_material_orders: analysis.raw_material_orders.len(),
            risk_alerts: analysis.risk_alerts.len(),
        };
        info!(
            run_id,
            created,
            forecasts = stats.forecasts,
            production_plans = stats.production_plans,
            raw_material_orders = stats.raw_material_orders,
            risk_alerts = stats.risk_alerts,
            "saved run"
        );
        Ok(stats)
    }

    pub fn find_run(&self, run_id: &str) -> Result<Option<Run>> {
        find_run(&self.connection, run_id)
    }

    pub fn load_run(&self, run_id: &str) -> Result<Run> {
        require_run(&self.connection, run_id)
    }

    pub fn run_exists(&self, run_id: &str) -> Result<bool> {
        Ok(find_run(&self.connection, run_id)?.is_some())
    }

    pub fn latest_run(&self) -> Result<Option<Run>> {
        latest_run(&self.connection)
    }

    /// Newest first.
    pub fn list_runs(&self) -> Result<Vec<Run>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT id, created_at, created_at_unix_ms, notes, summary_text
                 FROM runs
                 ORDER BY created_at_unix_ms DESC, rowid DESC",
            )
            .storage_context("failed to prepare run listing")?;
        let rows = statement
            .query_map([], decode_run)
            .storage_context("failed to list runs")?;
        rows.map(|row| row.storage_context("failed to decode run row"))
            .collect()
    }

    pub fn load_snapshot(&self, run_id: &str) -> Result<RunSnapshot> {
        load_snapshot(&self.connection, run_id)
    }

    pub fn load_forecasts(&self, run_id: &str) -> Result<Vec<Forecast>> {
        load_forecasts(&self.connection, run_id)
    }

    pub fn load_production_plans(&self, run_id: &str) -> Result<Vec<ProductionPlan>> {
        load_production_plans(&self.connection, run_id)
    }

    pub fn load_raw_material_orders(&self, run_id: &str) -> Result<Vec<RawMaterialOrder>> {
        load_raw_material_orders(&self.connection, run_id)
    }

    pub fn load_risk_alerts(&self, run_id: &str) -> Result<Vec<RiskAlert>> {
        load_risk_alerts(&self.connection, run_id)
    }

    /// Deletes the run and, through the foreign keys, all of its children.
    /// Returns whether a run was removed.
    pub fn delete_run(&self, run_id: &str) -> Result<bool> {
        let removed = self
            .connection
            .execute("DELETE FROM runs WHERE id = ?1", [run_id])
            .with_storage_context(|| format!("failed to delete run `{run_id}`"))?;
        if removed > 0 {
            info!(run_id, "deleted run");
        }
        Ok(removed > 0)
    }
}

#[must_use]
pub fn new_run(run_id: &str, notes: Option<String>) -> Run {
    let now = Timestamp::now();
    Run {
        id: run_id.to_string(),
        created_at: now.utc_millis(),
        created_at_unix_ms: now.unix_ms(),
        notes,
        summary_text: None,
    }
}

pub fn insert_run(connection: &Connection, run: &Run) -> Result<()> {
    connection
        .execute(
            "INSERT INTO runs (id, created_at, created_at_unix_ms, notes, summary_text)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.id,
                run.created_at,
                to_i64(run.created_at_unix_ms, "created_at_unix_ms")?,
                run.notes,
                run.summary_text,
            ],
        )
        .with_storage_context(|| format!("failed to insert run `{}`", run.id))?;
    Ok(())
}

pub fn find_run(connection: &Connection, run_id: &str) -> Result<Option<Run>> {
    connection
        .query_row(
            "SELECT id, created_at, created_at_unix_ms, notes, summary_text
             FROM runs WHERE id = ?1",
            [run_id],
            decode_run,
        )
        .optional()
        .with_storage_context(|| format!("failed to read run `{run_id}`"))
}

pub fn require_run(connection: &Connection, run_id: &str) -> Result<Run> {
    find_run(connection, run_id)?
        .ok_or_else(|| PlanError::not_found(format!("run `{run_id}` does not exist")))
}

/// Most recent `created_at`; insertion order breaks ties.
pub fn latest_run(connection: &Connection) -> Result<Option<Run>> {
    connection
        .query_row(
            "SELECT id, created_at, created_at_unix_ms, notes, summary_text
             FROM runs
             ORDER BY created_at_unix_ms DESC, rowid DESC
             LIMIT 1",
            [],
            decode_run,
        )
        .optional()
        .storage_context("failed to resolve latest run")
}

pub fn load_snapshot(connection: &Connection, run_id: &str) -> Result<RunSnapshot> {
    let run = require_run(connection, run_id)?;
    Ok(RunSnapshot {
        forecasts: load_forecasts(connection, run_id)?,
        production_plans: load_production_plans(connection, run_id)?,
        raw_material_orders: load_raw_material_orders(connection, run_id)?,
        risk_alerts: load_risk_alerts(connection, run_id)?,
        run,
    })
}

pub fn load_forecasts(connection: &Connection, run_id: &str) -> Result<Vec<Forecast>> {
    load_children(
        connection,
        run_id,
        "SELECT sku, forecasted_demand, confidence_or_reason
         FROM forecasts WHERE run_id = ?1 ORDER BY id",
        FORECASTS_TABLE,
        |row| {
            Ok(Forecast {
                sku: row.get(0)?,
                forecasted_demand: get_count(row, 1)?,
                confidence_or_reason: row.get(2)?,
            })
        },
    )
}

pub fn load_production_plans(connection: &Connection, run_id: &str) -> Result<Vec<ProductionPlan>> {
    load_children(
        connection,
        run_id,
        "SELECT sku, forecasted_demand, current_inventory, suggested_production
         FROM production_plans WHERE run_id = ?1 ORDER BY id",
        PRODUCTION_PLANS_TABLE,
        |row| {
            Ok(ProductionPlan {
                sku: row.get(0)?,
                forecasted_demand: get_count(row, 1)?,
                current_inventory: get_count(row, 2)?,
                suggested_production: get_count(row, 3)?,
            })
        },
    )
}

pub fn load_raw_material_orders(
    connection: &Connection,
    run_id: &str,
) -> Result<Vec<RawMaterialOrder>> {
    load_children(
        connection,
        run_id,
        "SELECT material_id, needed_qty_kg, current_stock_kg, suggested_order_kg
         FROM raw_material_orders WHERE run_id = ?1 ORDER BY id",
        RAW_MATERIAL_ORDERS_TABLE,
        |row| {
            Ok(RawMaterialOrder {
                material_id: row.get(0)?,
                needed_qty_kg: get_quantity(row, 1)?,
                current_stock_kg: get_quantity(row, 2)?,
                suggested_order_kg: get_quantity(row, 3)?,
            })
        },
    )
}

pub fn load_risk_alerts(connection: &Connection, run_id: &str) -> Result<Vec<RiskAlert>> {
    load_children(
        connection,
        run_id,
        "SELECT alert_type, description, sku_or_material
         FROM risk_alerts WHERE run_id = ?1 ORDER BY id",
        RISK_ALERTS_TABLE,
        |row| {
            Ok(RiskAlert {
                alert_type: row.get(0)?,
                description: row.get(1)?,
                sku_or_material: row.get(2)?,
            })
        },
    )
}

pub fn insert_forecasts(connection: &Connection, run_id: &str, rows: &[Forecast]) -> Result<()> {
    let mut statement = connection
        .prepare_cached(
            "INSERT INTO forecasts (run_id, sku, forecasted_demand, confidence_or_reason)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .storage_context("failed to prepare forecast insert")?;
    for row in rows {
        statement
            .execute(params![
                run_id,
                row.sku,
                to_i64(row.forecasted_demand, "forecasted_demand")?,
                row.confidence_or_reason,
            ])
            .with_storage_context(|| format!("failed to insert forecast sku={}", row.sku))?;
    }
    Ok(())
}

pub fn insert_production_plans(
    connection: &Connection,
    run_id: &str,
    rows: &[ProductionPlan],
) -> Result<()> {
    let mut statement = connection
        .prepare_cached(
            "INSERT INTO production_plans
                (run_id, sku, forecasted_demand, current_inventory, suggested_production)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .storage_context("failed to prepare production plan insert")?;
    for row in rows {
        statement
            .execute(params![
                run_id,
                row.sku,
                to_i64(row.forecasted_demand, "forecasted_demand")?,
                to_i64(row.current_inventory, "current_inventory")?,
                to_i64(row.suggested_production, "suggested_production")?,
            ])
            .with_storage_context(|| format!("failed to insert production plan sku={}", row.sku))?;
    }
    Ok(())
}

pub fn insert_raw_material_orders(
    connection: &Connection,
    run_id: &str,
    rows: &[RawMaterialOrder],
) -> Result<()> {
    let mut statement = connection
        .prepare_cached(
            "INSERT INTO raw_material_orders
                (run_id, material_id, needed_qty_kg, current_stock_kg, suggested_order_kg)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .storage_context("failed to prepare raw material order insert")?;
    for row in rows {
        statement
            .execute(params![
                run_id,
                row.material_id,
                row.needed_qty_kg,
                row.current_stock_kg,
                row.suggested_order_kg,
            ])
            .with_storage_context(|| {
                format!("failed to insert raw material order material_id={}", row.material_id)
            })?;
    }
    Ok(())
}

pub fn insert_risk_alerts(connection: &Connection, run_id: &str, rows: &[RiskAlert]) -> Result<()> {
    let mut statement = connection
        .prepare_cached(
            "INSERT INTO risk_alerts (run_id, alert_type, sku_or_material, description)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .storage_context("failed to prepare risk alert insert")?;
    for row in rows {
        statement
            .execute(params![
                run_id,
                row.alert_type,
                row.sku_or_material,
                row.description,
            ])
            .with_storage_context(|| format!("failed to insert risk alert type={}", row.alert_type))?;
    }
    Ok(())
}

fn delete_children(connection: &Connection, run_id: &str) -> Result<()> {
    for table in [
        FORECASTS_TABLE,
        PRODUCTION_PLANS_TABLE,
        RAW_MATERIAL_ORDERS_TABLE,
        RISK_ALERTS_TABLE,
    ] {
        connection
            .execute(&format!("DELETE FROM {table} WHERE run_id = ?1"), [run_id])
            .with_storage_context(|| format!("failed to clear {table} for run `{run_id}`"))?;
    }
    Ok(())
}

fn load_children<T>(
    connection: &Connection,
    run_id: &str,
    sql: &str,
    table: &str,
    decode: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut statement = connection
        .prepare_cached(sql)
        .with_storage_context(|| format!("failed to prepare {table} read"))?;
    let rows = statement
        .query_map([run_id], decode)
        .with_storage_context(|| format!("failed to read {table} for run `{run_id}`"))?;
    rows.map(|row| {
        row.with_storage_context(|| format!("failed to decode {table} row for run `{run_id}`"))
    })
    .collect()
}

fn decode_run(row: &Row<'_>) -> rusqlite::Result<Run> {
    Ok(Run {
        id: row.get(0)?,
        created_at: row.get(1)?,
        created_at_unix_ms: get_count(row, 2)?,
        notes: row.get(3)?,
        summary_text: row.get(4)?,
    })
}

fn get_count(row: &Row<'_>, index: usize) -> rusqlite::Result<u64> {
    let value = row.get::<usize, i64>(index)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(index, value))
}

fn get_quantity(row: &Row<'_>, index: usize) -> rusqlite::Result<f64> {
    let value = row.get::<usize, f64>(index)?;
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(rusqlite::Error::FromSqlConversionFailure(
            index,
            Type::Real,
            format!("quantity must be a finite non-negative number, got {value}").into(),
        ))
    }
}

fn to_i64(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| PlanError::validation(format!("{field} exceeds sqlite INTEGER range")))
}
