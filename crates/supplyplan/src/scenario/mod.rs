//! What-if simulation: clone a baseline run, perturb demand and material
//! orders, restore the planning invariants and persist the result as a new run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::TransactionBehavior;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diff::signed_delta;
use crate::error::{PlanError, Result, StorageContext};
use crate::models::{Forecast, ProductionPlan, RawMaterialOrder, Run};
use crate::sqlite::{self, RunStore};
use crate::utils::time::Timestamp;

static SCENARIO_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioRequest {
    /// `None` simulates against the most recent run.
    #[serde(default)]
    pub baseline_run_id: Option<String>,

    /// SKU -> factor applied to forecasted demand.
    #[serde(default)]
    pub demand_multipliers: BTreeMap<String, f64>,

    /// Material id -> ceiling in kg for the suggested order.
    #[serde(default)]
    pub material_caps: BTreeMap<String, f64>,
}

impl ScenarioRequest {
    /// Parses a JSON request. Malformed or non-numeric values are validation
    /// failures, not storage failures.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|error| PlanError::validation(format!("invalid scenario request: {error}")))
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(baseline) = self.baseline_run_id.as_deref() {
            if baseline.trim().is_empty() {
                return Err(PlanError::validation(
                    "baseline run id must not be empty when given",
                ));
            }
        }
        ensure_factors("demand multiplier", &self.demand_multipliers)?;
        ensure_factors("material cap", &self.material_caps)
    }
}

fn ensure_factors(kind: &str, values: &BTreeMap<String, f64>) -> Result<()> {
    for (key, value) in values {
        if !value.is_finite() {
            return Err(PlanError::validation(format!(
                "{kind} for `{key}` must be a finite number"
            )));
        }
        if *value < 0.0 {
            return Err(PlanError::validation(format!(
                "{kind} for `{key}` must not be negative, got {value}"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunTotals {
    pub forecast_units: u64,
    pub production_units: u64,
    pub orders_kg: f64,
}

impl RunTotals {
    #[must_use]
    pub fn of(
        forecasts: &[Forecast],
        plans: &[ProductionPlan],
        orders: &[RawMaterialOrder],
    ) -> Self {
        Self {
            forecast_units: forecasts
                .iter()
                .fold(0u64, |sum, row| sum.saturating_add(row.forecasted_demand)),
            production_units: plans
                .iter()
                .fold(0u64, |sum, row| sum.saturating_add(row.suggested_production)),
            orders_kg: orders.iter().map(|row| row.suggested_order_kg).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioOutcome {
    pub new_run_id: String,
    pub baseline_run_id: String,
    pub totals: RunTotals,
    pub baseline_totals: RunTotals,
    pub summary: String,

    /// Multiplier SKUs that matched no forecast row.
    pub ignored_multipliers: Vec<String>,

    /// Cap material ids that matched no order row.
    pub ignored_caps: Vec<String>,
}

/// Clones the baseline into a new run and applies `request`. The clone,
/// perturbation, recomputation and insert all commit together or not at all.
pub fn simulate(store: &mut RunStore, request: &ScenarioRequest) -> Result<ScenarioOutcome> {
    request.validate()?;

    let tx = store
        .connection_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .storage_context("failed to open scenario transaction")?;

    let baseline = match request.baseline_run_id.as_deref() {
        Some(run_id) => sqlite::require_run(&tx, run_id)?,
        None => sqlite::latest_run(&tx)?
            .ok_or_else(|| PlanError::not_found("no runs exist to use as a baseline"))?,
    };

    let base_forecasts = sqlite::load_forecasts(&tx, &baseline.id)?;
    let base_plans = sqlite::load_production_plans(&tx, &baseline.id)?;
    let base_orders = sqlite::load_raw_material_orders(&tx, &baseline.id)?;
    let baseline_totals = RunTotals::of(&base_forecasts, &base_plans, &base_orders);

    let mut forecasts = base_forecasts;
    let mut plans = base_plans;
    let mut orders = base_orders;

    let ignored_multipliers = apply_demand_multipliers(
        &mut forecasts,
        &mut plans,
        &request.demand_multipliers,
    );
    for plan in &mut plans {
        plan.recompute();
    }
    let ignored_caps = apply_material_caps(&mut orders, &request.material_caps);

    let mut run = scenario_run(&baseline);
    let totals = RunTotals::of(&forecasts, &plans, &orders);
    let summary = render_summary(&run.id, &baseline.id, &totals, &baseline_totals);
    run.summary_text = Some(summary.clone());

    sqlite::insert_run(&tx, &run)?;
    sqlite::insert_forecasts(&tx, &run.id, &forecasts)?;
    sqlite::insert_production_plans(&tx, &run.id, &plans)?;
    sqlite::insert_raw_material_orders(&tx, &run.id, &orders)?;

    tx.commit()
        .with_storage_context(|| format!("failed to commit scenario run `{}`", run.id))?;

    if !ignored_multipliers.is_empty() || !ignored_caps.is_empty() {
        debug!(
            ?ignored_multipliers,
            ?ignored_caps,
            "scenario keys matched no rows"
        );
    }
    info!(
        run_id = %run.id,
        baseline_run_id = %baseline.id,
        forecast_units = totals.forecast_units,
        production_units = totals.production_units,
        orders_kg = totals.orders_kg,
        "simulated scenario"
    );

    Ok(ScenarioOutcome {
        new_run_id: run.id,
        baseline_run_id: baseline.id,
        totals,
        baseline_totals,
        summary,
        ignored_multipliers,
        ignored_caps,
    })
}

/// Scales forecast demand and mirrors the new value onto the matching plan
/// row; forecasts are the source of truth for demand. Returns unmatched SKUs.
pub fn apply_demand_multipliers(
    forecasts: &mut [Forecast],
    plans: &mut [ProductionPlan],
    multipliers: &BTreeMap<String, f64>,
) -> Vec<String> {
    let mut ignored = Vec::new();
    for (sku, factor) in multipliers {
        let Some(forecast) = forecasts.iter_mut().find(|row| &row.sku == sku) else {
            ignored.push(sku.clone());
            continue;
        };
        forecast.forecasted_demand = scale_demand(forecast.forecasted_demand, *factor);

        if let Some(plan) = plans.iter_mut().find(|row| &row.sku == sku) {
            plan.forecasted_demand = forecast.forecasted_demand;
        }
    }
    ignored
}

/// Recomputes every order and clamps capped ones. Returns unmatched ids.
pub fn apply_material_caps(
    orders: &mut [RawMaterialOrder],
    caps: &BTreeMap<String, f64>,
) -> Vec<String> {
    for order in orders.iter_mut() {
        order.recompute(caps.get(&order.material_id).copied());
    }
    caps.keys()
        .filter(|material_id| !orders.iter().any(|row| &row.material_id == *material_id))
        .cloned()
        .collect()
}

/// Rounds half to even; the float-to-int cast saturates at the u64 bounds.
#[must_use]
pub fn scale_demand(demand: u64, factor: f64) -> u64 {
    ((demand as f64) * factor).round_ties_even() as u64
}

#[must_use]
pub fn render_summary(
    new_run_id: &str,
    baseline_run_id: &str,
    totals: &RunTotals,
    baseline_totals: &RunTotals,
) -> String {
    format!(
        "Scenario {new_run_id} vs {baseline_run_id}: forecast {} ({:+}), production {} ({:+}), orders {:.1}kg ({:+.1})",
        totals.forecast_units,
        signed_delta(totals.forecast_units, baseline_totals.forecast_units),
        totals.production_units,
        signed_delta(totals.production_units, baseline_totals.production_units),
        totals.orders_kg,
        totals.orders_kg - baseline_totals.orders_kg,
    )
}

fn scenario_run(baseline: &Run) -> Run {
    let now = Timestamp::now();
    let sequence = SCENARIO_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    Run {
        id: format!("scenario-{}-{sequence}-{}", now.compact_nanos(), baseline.id),
        created_at: now.utc_millis(),
        created_at_unix_ms: now.unix_ms(),
        notes: Some(format!("Scenario cloned from {}", baseline.id)),
        summary_text: None,
    }
}
