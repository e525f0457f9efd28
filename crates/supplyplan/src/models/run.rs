use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PlanError, Result};

pub const ALERT_TYPE_EXPIRY: &str = "expiry";
pub const ALERT_TYPE_STOCKOUT: &str = "stockout";

/// One planning cycle. Children are owned through `run_id` and cascade on delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Run {
    pub id: String,
    pub created_at: String,
    pub created_at_unix_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Forecast {
    pub sku: String,
    pub forecasted_demand: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_or_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProductionPlan {
    pub sku: String,
    pub forecasted_demand: u64,
    pub current_inventory: u64,
    pub suggested_production: u64,
}

impl ProductionPlan {
    #[must_use]
    pub fn required_production(&self) -> u64 {
        self.forecasted_demand.saturating_sub(self.current_inventory)
    }

    /// Restores `suggested_production == max(forecasted_demand - current_inventory, 0)`.
    pub fn recompute(&mut self) {
        self.suggested_production = self.required_production();
    }

    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.suggested_production == self.required_production()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawMaterialOrder {
    pub material_id: String,
    pub needed_qty_kg: f64,
    pub current_stock_kg: f64,
    pub suggested_order_kg: f64,
}

impl RawMaterialOrder {
    #[must_use]
    pub fn required_order_kg(&self) -> f64 {
        (self.needed_qty_kg - self.current_stock_kg).max(0.0)
    }

    /// Restores the order invariant, then clamps to `cap_kg` when one is given.
    /// A cap only ever lowers the order.
    pub fn recompute(&mut self, cap_kg: Option<f64>) {
        let required = self.required_order_kg();
        self.suggested_order_kg = match cap_kg {
            Some(cap_kg) => required.min(cap_kg),
            None => required,
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RiskAlert {
    pub alert_type: String,
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku_or_material: Option<String>,
}

/// Payload persisted by a bulk save: everything an analysis produced for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunAnalysis {
    #[serde(default)]
    pub forecast_table: Vec<Forecast>,

    #[serde(default)]
    pub production_plan: Vec<ProductionPlan>,

    #[serde(default)]
    pub raw_material_orders: Vec<RawMaterialOrder>,

    #[serde(default)]
    pub risk_alerts: Vec<RiskAlert>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_text: Option<String>,
}

impl RunAnalysis {
    pub fn validate(&self) -> Result<()> {
        ensure_unique_keys(
            "forecast_table",
            "sku",
            self.forecast_table.iter().map(|row| row.sku.as_str()),
        )?;
        ensure_unique_keys(
            "production_plan",
            "sku",
            self.production_plan.iter().map(|row| row.sku.as_str()),
        )?;
        ensure_unique_keys(
            "raw_material_orders",
            "material_id",
            self.raw_material_orders
                .iter()
                .map(|row| row.material_id.as_str()),
        )?;

        for order in &self.raw_material_orders {
            for (field, value) in [
                ("needed_qty_kg", order.needed_qty_kg),
                ("current_stock_kg", order.current_stock_kg),
                ("suggested_order_kg", order.suggested_order_kg),
            ] {
                ensure_quantity(value).map_err(|detail| {
                    PlanError::validation(format!(
                        "raw_material_orders[{}].{field} {detail}",
                        order.material_id
                    ))
                })?;
            }
        }

        if let Some(index) = self
            .risk_alerts
            .iter()
            .position(|alert| alert.alert_type.trim().is_empty())
        {
            return Err(PlanError::validation(format!(
                "risk_alerts[{index}].alert_type must not be empty"
            )));
        }

        Ok(())
    }
}

/// A run together with every child row it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunSnapshot {
    pub run: Run,
    pub forecasts: Vec<Forecast>,
    pub production_plans: Vec<ProductionPlan>,
    pub raw_material_orders: Vec<RawMaterialOrder>,
    pub risk_alerts: Vec<RiskAlert>,
}

pub fn validate_run_id(run_id: &str) -> Result<()> {
    if run_id.trim().is_empty() {
        return Err(PlanError::validation("run id must not be empty"));
    }
    Ok(())
}

fn ensure_unique_keys<'a>(
    table: &str,
    field: &str,
    keys: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let mut seen = BTreeSet::new();
    for (index, key) in keys.enumerate() {
        if key.trim().is_empty() {
            return Err(PlanError::validation(format!(
                "{table}[{index}].{field} must not be empty"
            )));
        }
        if !seen.insert(key) {
            return Err(PlanError::validation(format!(
                "{table} has duplicate {field} `{key}`"
            )));
        }
    }
    Ok(())
}

fn ensure_quantity(value: f64) -> std::result::Result<(), &'static str> {
    if !value.is_finite() {
        return Err("must be a finite number");
    }
    if value < 0.0 {
        return Err("must not be negative");
    }
    Ok(())
}

#[must_use]
pub fn analysis_json_schema() -> Value {
    let schema = schemars::schema_for!(RunAnalysis);
    serde_json::to_value(schema).unwrap_or(Value::Null)
}
