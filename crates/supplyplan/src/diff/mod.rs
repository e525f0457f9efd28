use std::collections::BTreeMap;

use rusqlite::TransactionBehavior;
use serde::Serialize;
use tracing::info;

use crate::error::{PlanError, Result, StorageContext};
use crate::models::{Forecast, ProductionPlan, RawMaterialOrder};
use crate::sqlite::{self, RunStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountDelta {
    pub key: String,
    pub base_value: u64,
    pub scenario_value: u64,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuantityDelta {
    pub key: String,
    pub base_value: f64,
    pub scenario_value: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DiffTotals {
    pub forecast_delta: i64,
    pub production_delta: i64,
    pub orders_delta_kg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunDiff {
    pub base_run_id: String,
    pub scenario_run_id: String,
    pub forecast_delta: Vec<CountDelta>,
    pub production_delta: Vec<CountDelta>,
    pub orders_delta: Vec<QuantityDelta>,
    pub totals: DiffTotals,
    pub summary: String,
}

/// Read-only comparison of two stored runs. Keys missing on one side count
/// as zero there.
pub fn diff(store: &mut RunStore, base_run_id: &str, scenario_run_id: &str) -> Result<RunDiff> {
    if base_run_id.trim().is_empty() || scenario_run_id.trim().is_empty() {
        return Err(PlanError::validation(
            "both a base run id and a scenario run id are required",
        ));
    }

    let tx = store
        .connection_mut()
        .transaction_with_behavior(TransactionBehavior::Deferred)
        .storage_context("failed to open diff read transaction")?;

    sqlite::require_run(&tx, base_run_id)?;
    sqlite::require_run(&tx, scenario_run_id)?;

    let base_forecasts = sqlite::load_forecasts(&tx, base_run_id)?;
    let scenario_forecasts = sqlite::load_forecasts(&tx, scenario_run_id)?;
    let base_plans = sqlite::load_production_plans(&tx, base_run_id)?;
    let scenario_plans = sqlite::load_production_plans(&tx, scenario_run_id)?;
    let base_orders = sqlite::load_raw_material_orders(&tx, base_run_id)?;
    let scenario_orders = sqlite::load_raw_material_orders(&tx, scenario_run_id)?;

    // Read-only; nothing to commit.
    tx.rollback()
        .storage_context("failed to close diff read transaction")?;

    let run_diff = compare(
        base_run_id,
        scenario_run_id,
        RunRows {
            forecasts: &base_forecasts,
            plans: &base_plans,
            orders: &base_orders,
        },
        RunRows {
            forecasts: &scenario_forecasts,
            plans: &scenario_plans,
            orders: &scenario_orders,
        },
    );
    info!(
        base_run_id,
        scenario_run_id,
        forecast_delta = run_diff.totals.forecast_delta,
        production_delta = run_diff.totals.production_delta,
        orders_delta_kg = run_diff.totals.orders_delta_kg,
        "computed run diff"
    );
    Ok(run_diff)
}

/// Borrowed child rows of one run.
#[derive(Debug, Clone, Copy)]
pub struct RunRows<'a> {
    pub forecasts: &'a [Forecast],
    pub plans: &'a [ProductionPlan],
    pub orders: &'a [RawMaterialOrder],
}

#[must_use]
pub fn compare(
    base_run_id: &str,
    scenario_run_id: &str,
    base: RunRows<'_>,
    scenario: RunRows<'_>,
) -> RunDiff {
    let forecast_delta = count_deltas(
        base.forecasts
            .iter()
            .map(|row| (row.sku.as_str(), row.forecasted_demand)),
        scenario
            .forecasts
            .iter()
            .map(|row| (row.sku.as_str(), row.forecasted_demand)),
    );
    let production_delta = count_deltas(
        base.plans
            .iter()
            .map(|row| (row.sku.as_str(), row.suggested_production)),
        scenario
            .plans
            .iter()
            .map(|row| (row.sku.as_str(), row.suggested_production)),
    );
    let orders_delta = quantity_deltas(base.orders, scenario.orders);

    let totals = DiffTotals {
        forecast_delta: forecast_delta
            .iter()
            .fold(0i64, |sum, row| sum.saturating_add(row.delta)),
        production_delta: production_delta
            .iter()
            .fold(0i64, |sum, row| sum.saturating_add(row.delta)),
        orders_delta_kg: orders_delta.iter().map(|row| row.delta).sum(),
    };
    let summary = format!(
        "Diff {scenario_run_id} vs {base_run_id}: Δforecast={:+}, Δproduction={:+}, Δorders={:+.1}kg",
        totals.forecast_delta, totals.production_delta, totals.orders_delta_kg
    );

    RunDiff {
        base_run_id: base_run_id.to_string(),
        scenario_run_id: scenario_run_id.to_string(),
        forecast_delta,
        production_delta,
        orders_delta,
        totals,
        summary,
    }
}

/// `scenario - base`, clamped into the i64 range.
#[must_use]
pub fn signed_delta(scenario: u64, base: u64) -> i64 {
    let delta = i128::from(scenario) - i128::from(base);
    i64::try_from(delta).unwrap_or(if delta < 0 { i64::MIN } else { i64::MAX })
}

fn count_deltas<'a>(
    base: impl Iterator<Item = (&'a str, u64)>,
    scenario: impl Iterator<Item = (&'a str, u64)>,
) -> Vec<CountDelta> {
    let mut sides = BTreeMap::<&str, (u64, u64)>::new();
    for (key, value) in base {
        let entry = sides.entry(key).or_default();
        entry.0 = entry.0.saturating_add(value);
    }
    for (key, value) in scenario {
        let entry = sides.entry(key).or_default();
        entry.1 = entry.1.saturating_add(value);
    }

    sides
        .into_iter()
        .map(|(key, (base_value, scenario_value))| CountDelta {
            key: key.to_string(),
            base_value,
            scenario_value,
            delta: signed_delta(scenario_value, base_value),
        })
        .collect()
}

fn quantity_deltas(base: &[RawMaterialOrder], scenario: &[RawMaterialOrder]) -> Vec<QuantityDelta> {
    let mut sides = BTreeMap::<&str, (f64, f64)>::new();
    for row in base {
        sides.entry(row.material_id.as_str()).or_default().0 += row.suggested_order_kg;
    }
    for row in scenario {
        sides.entry(row.material_id.as_str()).or_default().1 += row.suggested_order_kg;
    }

    sides
        .into_iter()
        .map(|(key, (base_value, scenario_value))| QuantityDelta {
            key: key.to_string(),
            base_value,
            scenario_value,
            delta: scenario_value - base_value,
        })
        .collect()
}
