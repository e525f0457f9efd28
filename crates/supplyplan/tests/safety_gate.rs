use std::collections::{BTreeMap, BTreeSet};

use supplyplan::error::PlanError;
use supplyplan::guard::{Cell, ViolationReason, evaluate, execute_gated, is_safe};
use supplyplan::models::{Forecast, RunAnalysis};
use supplyplan::sqlite::RunStore;

fn allowed_tables() -> BTreeSet<String> {
    [
        "runs",
        "forecasts",
        "production_plans",
        "raw_material_orders",
        "risk_alerts",
    ]
    .into_iter()
    .map(ToString::to_string)
    .collect()
}

fn safe(query: &str) -> bool {
    is_safe(query, &allowed_tables(), &BTreeMap::new())
}

fn rejection(query: &str) -> ViolationReason {
    evaluate(query, &allowed_tables())
        .expect_err("query should be rejected")
        .reason
}

#[test]
fn literal_acceptance_and_rejection_cases() {
    assert!(safe("SELECT * FROM runs LIMIT 50"));
    assert_eq!(
        rejection("SELECT * FROM runs; DROP TABLE runs"),
        ViolationReason::MultiStatement
    );
    assert_eq!(
        rejection("SELECT * FROM secrets LIMIT 10"),
        ViolationReason::UnknownTable
    );
    assert_eq!(
        rejection("SELECT * FROM runs LIMIT 9999"),
        ViolationReason::LimitTooLarge
    );
}

#[test]
fn non_select_statements_are_never_safe() {
    for query in [
        "",
        "   ",
        "DELETE FROM runs",
        "with recent as (select * from runs limit 5) select * from recent limit 5",
        "(SELECT * FROM runs LIMIT 5)",
        "EXPLAIN SELECT * FROM runs LIMIT 5",
        "VACUUM",
        "ATTACH DATABASE 'x.db' AS x",
        "\u{feff}SELECT * FROM runs LIMIT 5",
    ] {
        assert!(!safe(query), "accepted non-select: {query:?}");
    }
}

#[test]
fn select_prefix_is_case_insensitive_and_one_terminator_is_allowed() {
    assert!(safe("  select sku from forecasts limit 5  "));
    assert!(safe("SeLeCt sku FROM forecasts LIMIT 5;"));
    assert!(safe("SELECT sku FROM forecasts LIMIT 5 ;  "));
    assert_eq!(
        rejection("SELECT sku FROM forecasts LIMIT 5;;"),
        ViolationReason::MultiStatement
    );
}

#[test]
fn denylisted_substrings_reject_anywhere() {
    for query in [
        "SELECT * FROM runs LIMIT 5 -- trailing comment",
        "SELECT * /* hidden */ FROM runs LIMIT 5",
        "SELECT * FROM pragma_table_info('runs') LIMIT 5",
        "SELECT 'insert' FROM runs LIMIT 5",
        "SELECT * FROM runs WHERE notes = 'drop me' LIMIT 5",
    ] {
        assert_eq!(rejection(query), ViolationReason::ForbiddenToken, "{query}");
    }
}

#[test]
fn identifiers_containing_denylisted_words_are_rejected_too() {
    // Substring matching is coarse: `created_at` contains `create`.
    assert_eq!(
        rejection("SELECT created_at FROM runs LIMIT 5"),
        ViolationReason::ForbiddenToken
    );
}

#[test]
fn limit_clause_is_mandatory_and_bounded() {
    assert_eq!(rejection("SELECT * FROM runs"), ViolationReason::MissingLimit);
    assert!(safe("SELECT * FROM runs LIMIT 200"));
    assert!(safe("SELECT * FROM runs LIMIT 0"));
    assert!(safe("SELECT * FROM runs LIMIT 10 OFFSET 400"));
    assert_eq!(rejection("SELECT * FROM runs LIMIT 201"), ViolationReason::LimitTooLarge);
    assert_eq!(rejection("SELECT * FROM runs LIMIT 1e3"), ViolationReason::InvalidLimit);
    assert_eq!(rejection("SELECT * FROM runs LIMIT 2.5"), ViolationReason::InvalidLimit);
    assert_eq!(
        rejection("SELECT * FROM runs LIMIT (SELECT 5)"),
        ViolationReason::InvalidLimit
    );
    assert_eq!(rejection("SELECT * FROM runs LIMIT 5, 500"), ViolationReason::AmbiguousLimit);
    assert_eq!(
        rejection("SELECT 'LIMIT 5' FROM runs"),
        ViolationReason::MissingLimit,
        "a LIMIT inside a string literal does not count"
    );
}

#[test]
fn joins_aliases_and_subqueries_are_scanned() {
    assert!(safe(
        "SELECT f.sku, p.suggested_production FROM forecasts f \
         JOIN production_plans AS p ON f.sku = p.sku AND f.run_id = p.run_id \
         WHERE f.run_id = 'run-1' ORDER BY f.sku LIMIT 20"
    ));
    assert!(safe(
        "SELECT * FROM (SELECT sku FROM forecasts LIMIT 10) AS sub LIMIT 5"
    ));
    assert!(safe(
        "SELECT sku FROM forecasts WHERE run_id IN (SELECT id FROM runs LIMIT 1) LIMIT 5"
    ));
    assert!(safe(
        "SELECT material_id, coalesce(suggested_order_kg, 0) FROM raw_material_orders \
         WHERE material_id IN ('flour', 'salt') GROUP BY material_id, run_id LIMIT 5"
    ));
    assert!(safe(r#"SELECT * FROM "runs" LIMIT 5"#));
    assert!(safe("SELECT 'FROM secrets' AS label FROM runs LIMIT 5"));
}

#[test]
fn unlisted_tables_flip_accepted_queries_to_rejected() {
    let accepted = [
        "SELECT * FROM runs LIMIT 5",
        "SELECT * FROM forecasts f JOIN production_plans p ON f.sku = p.sku LIMIT 5",
        "SELECT * FROM risk_alerts WHERE alert_type = 'expiry' LIMIT 5",
    ];
    for query in accepted {
        assert!(safe(query), "{query}");
    }

    for (query, tampered) in [
        (accepted[0], "SELECT * FROM runs, secrets LIMIT 5"),
        (accepted[0], "SELECT * FROM runs JOIN secrets ON 1 = 1 LIMIT 5"),
        (
            accepted[1],
            "SELECT * FROM forecasts f JOIN production_plans p ON f.sku = p.sku \
             LEFT JOIN secrets s ON s.sku = f.sku LIMIT 5",
        ),
        (
            accepted[2],
            "SELECT * FROM risk_alerts WHERE run_id IN (SELECT id FROM secrets LIMIT 5) LIMIT 5",
        ),
        (accepted[2], "SELECT * FROM risk_alerts WHERE run_id IN secrets LIMIT 5"),
        (accepted[0], r#"SELECT * FROM "secrets" LIMIT 5"#),
        (accepted[0], "SELECT * FROM sqlite_master LIMIT 5"),
        (accepted[0], "SELECT * FROM main.runs LIMIT 5"),
        (accepted[0], "SELECT * FROM (secrets) LIMIT 5"),
        (accepted[0], "SELECT * FROM runs JOIN (secrets) ON 1 = 1 LIMIT 5"),
        (accepted[0], "SELECT * FROM runs, (secrets) LIMIT 5"),
        (accepted[0], "SELECT * FROM (sqlite_master) LIMIT 5"),
        (accepted[0], "SELECT * FROM ((secrets)) LIMIT 5"),
        (
            accepted[1],
            "SELECT * FROM (forecasts f JOIN secrets s ON f.sku = s.sku) LIMIT 5",
        ),
    ] {
        assert!(safe(query));
        assert_eq!(rejection(tampered), ViolationReason::UnknownTable, "{tampered}");
    }
}

#[test]
fn unparseable_table_positions_are_rejected() {
    for query in [
        "SELECT * FROM LIMIT 5",
        "SELECT * FROM 'runs' LIMIT 5",
        "SELECT * FROM runs JOIN LIMIT 5",
        "SELECT * FROM (SELECT * FROM runs LIMIT 5 LIMIT 5",
        "SELECT * FROM runs) LIMIT 5",
    ] {
        assert!(!safe(query), "{query}");
    }
    assert_eq!(
        rejection("SELECT * FROM 'runs' LIMIT 5"),
        ViolationReason::UnparseableTableReference
    );
    assert_eq!(
        rejection("SELECT 'unterminated FROM runs LIMIT 5"),
        ViolationReason::UnbalancedQuote
    );
}

#[test]
fn verdicts_are_deterministic() {
    for query in [
        "SELECT * FROM runs LIMIT 50",
        "SELECT * FROM secrets LIMIT 10",
        "garbage ' \" [",
    ] {
        assert_eq!(safe(query), safe(query));
    }
}

fn seeded_store() -> RunStore {
    let mut store = RunStore::open_in_memory().expect("store should open");
    store
        .save_run(
            "run-1",
            &RunAnalysis {
                forecast_table: vec![
                    Forecast {
                        sku: "bread".to_string(),
                        forecasted_demand: 100,
                        confidence_or_reason: Some("seasonal".to_string()),
                    },
                    Forecast {
                        sku: "milk".to_string(),
                        forecasted_demand: 40,
                        confidence_or_reason: None,
                    },
                ],
                ..RunAnalysis::default()
            },
            Some("weekly plan"),
        )
        .expect("seed run should save");
    store
}

#[test]
fn gated_execution_returns_typed_rows() {
    let store = seeded_store();
    let result = execute_gated(
        &store,
        "SELECT sku, forecasted_demand, confidence_or_reason FROM forecasts ORDER BY sku LIMIT 10;",
    )
    .expect("safe query should execute");

    assert_eq!(
        result.columns,
        vec!["sku", "forecasted_demand", "confidence_or_reason"]
    );
    assert_eq!(result.row_count, 2);
    assert!(!result.truncated);
    assert_eq!(result.rows[0]["sku"], Cell::Text("bread".to_string()));
    assert_eq!(result.rows[0]["forecasted_demand"], Cell::Integer(100));
    assert_eq!(result.rows[1]["confidence_or_reason"], Cell::Null);

    let encoded = serde_json::to_value(&result.rows[0]).expect("rows should serialize");
    assert_eq!(encoded["forecasted_demand"], serde_json::json!(100));
}

#[test]
fn gated_execution_surfaces_rejections_as_safety_errors() {
    let store = seeded_store();
    let error = execute_gated(&store, "SELECT * FROM forecasts").expect_err("must reject");
    match &error {
        PlanError::SafetyRejected(violation) => {
            assert_eq!(violation.reason, ViolationReason::MissingLimit);
        }
        other => panic!("expected safety rejection, got {other:?}"),
    }
    assert!(!error.is_retryable());
}

#[test]
fn parenthesized_tables_and_subqueries_are_both_checked() {
    assert!(safe("SELECT * FROM (runs) LIMIT 5"));
    assert!(safe(
        "SELECT * FROM (forecasts f JOIN production_plans p ON f.sku = p.sku) LIMIT 5"
    ));
    assert!(safe(
        "SELECT * FROM (SELECT sku FROM forecasts LIMIT 5) AS f, (runs) LIMIT 5"
    ));
    assert!(safe(
        "SELECT count(*) FROM runs WHERE id IN (SELECT run_id FROM forecasts LIMIT 5) LIMIT 5"
    ));
    assert_eq!(
        rejection("SELECT * FROM (SELECT * FROM secrets LIMIT 5) LIMIT 5"),
        ViolationReason::UnknownTable
    );
    assert_eq!(
        rejection("SELECT * FROM (5) LIMIT 5"),
        ViolationReason::UnparseableTableReference
    );
}

#[test]
fn gated_execution_hides_internal_tables_behind_parentheses() {
    let store = seeded_store();
    for query in [
        "SELECT name, sql FROM (sqlite_master) LIMIT 5",
        "SELECT * FROM (supplyplan_schema_meta) LIMIT 5",
    ] {
        match execute_gated(&store, query) {
            Err(PlanError::SafetyRejected(violation)) => {
                assert_eq!(violation.reason, ViolationReason::UnknownTable, "{query}");
            }
            other => panic!("expected safety rejection for {query}, got {other:?}"),
        }
    }
}

#[test]
fn gated_execution_leaves_unknown_columns_to_the_executor() {
    let store = seeded_store();
    let error = execute_gated(&store, "SELECT no_such_column FROM forecasts LIMIT 5")
        .expect_err("unknown column must fail in sqlite");
    assert!(matches!(error, PlanError::Storage { .. }), "got {error:?}");
}

#[test]
fn gated_execution_follows_the_live_catalog() {
    let store = seeded_store();
    let query = "SELECT supplier_id FROM suppliers LIMIT 5";
    assert!(matches!(
        execute_gated(&store, query),
        Err(PlanError::SafetyRejected(_))
    ));

    store
        .connection()
        .execute_batch(
            "CREATE TABLE suppliers (supplier_id TEXT); INSERT INTO suppliers VALUES ('acme');",
        )
        .expect("extra table should be creatable");
    let result = execute_gated(&store, query).expect("new table should be queryable");
    assert_eq!(result.rows[0]["supplier_id"], Cell::Text("acme".to_string()));
}
