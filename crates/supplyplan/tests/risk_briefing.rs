use supplyplan::error::PlanError;
use supplyplan::models::{ProductionPlan, RiskAlert, RunAnalysis};
use supplyplan::risk::{NO_RUNS_SUMMARY, RiskKind, briefing};
use supplyplan::sqlite::RunStore;

fn plan(sku: &str, demand: u64, inventory: u64) -> ProductionPlan {
    ProductionPlan {
        sku: sku.to_string(),
        forecasted_demand: demand,
        current_inventory: inventory,
        suggested_production: demand.saturating_sub(inventory),
    }
}

#[test]
fn empty_store_reports_no_runs() {
    let store = RunStore::open_in_memory().expect("store should open");
    let report = briefing(&store, None).expect("briefing should succeed");
    assert_eq!(report.run_id, None);
    assert!(report.risks.is_empty());
    assert_eq!(report.summary, NO_RUNS_SUMMARY);
}

#[test]
fn latest_run_risks_include_stockouts_and_stored_expiries() {
    let mut store = RunStore::open_in_memory().expect("store should open");
    store
        .save_run(
            "old",
            &RunAnalysis {
                production_plan: vec![plan("cake", 90, 10)],
                ..RunAnalysis::default()
            },
            None,
        )
        .expect("old run should save");
    store
        .save_run(
            "new",
            &RunAnalysis {
                production_plan: vec![plan("bread", 150, 40), plan("milk", 30, 30)],
                risk_alerts: vec![
                    RiskAlert {
                        alert_type: "expiry".to_string(),
                        description: "expires Friday".to_string(),
                        sku_or_material: Some("yogurt".to_string()),
                    },
                    RiskAlert {
                        alert_type: "expiry".to_string(),
                        description: "batch 7 near date".to_string(),
                        sku_or_material: None,
                    },
                ],
                ..RunAnalysis::default()
            },
            None,
        )
        .expect("new run should save");

    let report = briefing(&store, None).expect("briefing should succeed");
    assert_eq!(report.run_id.as_deref(), Some("new"));
    assert_eq!(
        report
            .risks
            .iter()
            .map(|risk| risk.kind)
            .collect::<Vec<_>>(),
        vec![RiskKind::Stockout, RiskKind::Expiry, RiskKind::Expiry]
    );
    insta::assert_snapshot!(report.summary, @r"
    📊 Daily Risk Briefing
    - yogurt: expires Friday
    - item: batch 7 near date
    - bread: stockout risk (forecast 150 > inventory 40)
    ");

    let encoded = serde_json::to_value(&report.risks[0]).expect("risk should serialize");
    assert_eq!(encoded["type"], "stockout");
    assert_eq!(encoded["sku_or_material"], "bread");

    let old = briefing(&store, Some("old")).expect("named run should brief");
    assert_eq!(old.risks.len(), 1);
}

#[test]
fn named_missing_run_is_not_found() {
    let store = RunStore::open_in_memory().expect("store should open");
    assert!(matches!(
        briefing(&store, Some("ghost")),
        Err(PlanError::NotFound(_))
    ));
}
