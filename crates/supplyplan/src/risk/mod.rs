use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::models::{ALERT_TYPE_EXPIRY, ProductionPlan, RiskAlert};
use crate::sqlite::{self, RunStore};

pub const BRIEFING_HEADER: &str = "📊 Daily Risk Briefing";
pub const NO_RUNS_SUMMARY: &str = "No runs found";
const NO_RISKS_LINE: &str = "- No major risks detected in the latest run.";
const MAX_LINES_PER_KIND: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    Stockout,
    Expiry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskItem {
    #[serde(rename = "type")]
    pub kind: RiskKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku_or_material: Option<String>,

    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskReport {
    pub run_id: Option<String>,
    pub risks: Vec<RiskItem>,
    pub summary: String,
}

/// Stockout and expiry risks for `run_id`, or for the latest run when omitted.
/// An empty store is not an error.
pub fn briefing(store: &RunStore, run_id: Option<&str>) -> Result<RiskReport> {
    let connection = store.connection();
    let run = match run_id {
        Some(run_id) => sqlite::require_run(connection, run_id)?,
        None => match sqlite::latest_run(connection)? {
            Some(run) => run,
            None => {
                return Ok(RiskReport {
                    run_id: None,
                    risks: Vec::new(),
                    summary: NO_RUNS_SUMMARY.to_string(),
                });
            }
        },
    };

    let plans = sqlite::load_production_plans(connection, &run.id)?;
    let alerts = sqlite::load_risk_alerts(connection, &run.id)?;
    let risks = collect_risks(&plans, &alerts);
    let summary = render_briefing(&risks);

    info!(run_id = %run.id, risks = risks.len(), "built risk briefing");
    Ok(RiskReport {
        run_id: Some(run.id),
        risks,
        summary,
    })
}

/// Stockouts first, in plan order, then stored expiry alerts.
#[must_use]
pub fn collect_risks(plans: &[ProductionPlan], alerts: &[RiskAlert]) -> Vec<RiskItem> {
    let stockouts = plans
        .iter()
        .filter(|plan| plan.forecasted_demand > plan.current_inventory)
        .map(|plan| RiskItem {
            kind: RiskKind::Stockout,
            sku_or_material: Some(plan.sku.clone()),
            detail: format!(
                "forecast {} > inventory {}",
                plan.forecasted_demand, plan.current_inventory
            ),
        });
    let expiries = alerts
        .iter()
        .filter(|alert| alert.alert_type == ALERT_TYPE_EXPIRY)
        .map(|alert| RiskItem {
            kind: RiskKind::Expiry,
            sku_or_material: alert.sku_or_material.clone(),
            detail: alert.description.clone(),
        });
    stockouts.chain(expiries).collect()
}

#[must_use]
pub fn render_briefing(risks: &[RiskItem]) -> String {
    let mut lines = vec![BRIEFING_HEADER.to_string()];
    lines.extend(
        risks
            .iter()
            .filter(|risk| risk.kind == RiskKind::Expiry)
            .take(MAX_LINES_PER_KIND)
            .map(|risk| {
                let label = risk.sku_or_material.as_deref().unwrap_or("item");
                format!("- {label}: {}", risk.detail)
            }),
    );
    lines.extend(
        risks
            .iter()
            .filter(|risk| risk.kind == RiskKind::Stockout)
            .take(MAX_LINES_PER_KIND)
            .map(|risk| {
                let label = risk.sku_or_material.as_deref().unwrap_or("item");
                format!("- {label}: stockout risk ({})", risk.detail)
            }),
    );
    if lines.len() == 1 {
        lines.push(NO_RISKS_LINE.to_string());
    }
    lines.join("\n")
}
