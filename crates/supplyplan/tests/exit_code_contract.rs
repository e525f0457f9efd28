use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_VALIDATION_FAILURE: i32 = 2;
const EXIT_SAFETY_REJECTED: i32 = 3;
const EXIT_USAGE_ERROR: i32 = 64;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{nanos}"));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn supplyplan(temp: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_supplyplan"))
        .env_remove("SUPPLYPLAN_DATABASE")
        .env("SUPPLYPLAN_LOG", "off")
        .arg("--home-dir")
        .arg(temp)
        .arg("--cwd")
        .arg(temp)
        .args(args)
        .output()
        .expect("command should execute")
}

fn stdout_json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).expect("stdout should be a single json envelope")
}

fn write_baseline(temp: &Path) -> PathBuf {
    let input = temp.join("analysis.json");
    let payload = json!({
        "forecast_table": [{ "sku": "bread", "forecasted_demand": 100 }],
        "production_plan": [{
            "sku": "bread",
            "forecasted_demand": 100,
            "current_inventory": 40,
            "suggested_production": 60
        }],
        "raw_material_orders": [{
            "material_id": "flour",
            "needed_qty_kg": 500.0,
            "current_stock_kg": 200.0,
            "suggested_order_kg": 300.0
        }],
        "risk_alerts": [{ "alert_type": "expiry", "description": "yogurt expires", "sku_or_material": "yogurt" }]
    });
    std::fs::write(&input, payload.to_string()).expect("input should be writable");
    input
}

#[test]
fn missing_required_args_exit_with_usage_code() {
    let status = Command::new(env!("CARGO_BIN_EXE_supplyplan"))
        .arg("diff")
        .status()
        .expect("command should execute");
    assert_eq!(status.code(), Some(EXIT_USAGE_ERROR));
}

#[test]
fn relative_home_dir_exits_with_runtime_code() {
    let output = Command::new(env!("CARGO_BIN_EXE_supplyplan"))
        .env_remove("SUPPLYPLAN_DATABASE")
        .args(["--home-dir", "relative", "--cwd", "/", "runs", "list"])
        .output()
        .expect("command should execute");
    assert_eq!(output.status.code(), Some(EXIT_RUNTIME_FAILURE));
}

#[test]
fn init_creates_the_default_database_under_home() {
    let temp = unique_temp_dir("supplyplan-exit-init");
    let output = supplyplan(&temp, &["init"]);
    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));

    let envelope = stdout_json(&output);
    assert_eq!(envelope["ok"], true);
    assert_eq!(envelope["command"], "init");
    assert!(temp.join(".supplyplan").join("plan.sqlite").is_file());
    assert!(
        envelope["data"]["tables"]
            .as_array()
            .is_some_and(|tables| tables.contains(&json!("runs")))
    );
}

#[test]
fn save_simulate_diff_and_risks_round_trip_through_the_binary() {
    let temp = unique_temp_dir("supplyplan-exit-flow");
    let input = write_baseline(&temp);
    let input = input.to_str().expect("temp path should be utf-8");

    let output = supplyplan(&temp, &["save", "--run-id", "base", "--input", input]);
    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));
    assert_eq!(stdout_json(&output)["data"]["created"], true);

    let output = supplyplan(
        &temp,
        &["simulate", "--multiplier", "bread=1.5", "--cap", "flour=100", "--cap", "salt=1"],
    );
    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));
    let envelope = stdout_json(&output);
    assert_eq!(envelope["data"]["baseline_run_id"], "base");
    assert_eq!(envelope["data"]["totals"]["forecast_units"], 150);
    assert_eq!(envelope["data"]["totals"]["production_units"], 110);
    assert_eq!(envelope["data"]["totals"]["orders_kg"], 100.0);
    assert_eq!(envelope["warnings"][0]["code"], "unmatched_caps");
    let scenario_id = envelope["data"]["new_run_id"]
        .as_str()
        .expect("new run id should be a string")
        .to_string();

    let output = supplyplan(&temp, &["diff", "base", &scenario_id]);
    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));
    let envelope = stdout_json(&output);
    assert_eq!(envelope["data"]["totals"]["forecast_delta"], 50);
    assert_eq!(envelope["data"]["orders_delta"][0]["delta"], -200.0);

    let output = supplyplan(&temp, &["risks", "--run-id", "base"]);
    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));
    assert_eq!(stdout_json(&output)["data"]["risks"].as_array().map(Vec::len), Some(2));

    let output = supplyplan(
        &temp,
        &["query", "sql", "SELECT sku, forecasted_demand FROM forecasts ORDER BY forecasted_demand LIMIT 10"],
    );
    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));
    let envelope = stdout_json(&output);
    assert_eq!(envelope["meta"]["row_count"], 2);
    assert_eq!(envelope["data"]["rows"][1]["forecasted_demand"], 150);
}

#[test]
fn unsafe_sql_exits_with_safety_code() {
    let temp = unique_temp_dir("supplyplan-exit-safety");
    let output = supplyplan(&temp, &["query", "sql", "SELECT * FROM runs; DROP TABLE runs"]);
    assert_eq!(output.status.code(), Some(EXIT_SAFETY_REJECTED));

    let envelope = stdout_json(&output);
    assert_eq!(envelope["ok"], false);
    assert_eq!(envelope["error"]["code"], "safety_rejected");
    assert_eq!(
        envelope["error"]["details"]["violation"]["reason"],
        "multi_statement"
    );
}

#[test]
fn unknown_runs_and_bad_payloads_exit_with_validation_code() {
    let temp = unique_temp_dir("supplyplan-exit-validation");

    let output = supplyplan(&temp, &["diff", "ghost-a", "ghost-b"]);
    assert_eq!(output.status.code(), Some(EXIT_VALIDATION_FAILURE));
    assert_eq!(stdout_json(&output)["error"]["code"], "not_found");

    let output = supplyplan(&temp, &["simulate"]);
    assert_eq!(output.status.code(), Some(EXIT_VALIDATION_FAILURE));

    let bad_input = temp.join("bad.json");
    std::fs::write(&bad_input, "{\"forecast_table\": \"nope\"}").expect("bad input should be writable");
    let output = supplyplan(
        &temp,
        &["save", "--run-id", "r1", "--input", bad_input.to_str().expect("utf-8 path")],
    );
    assert_eq!(output.status.code(), Some(EXIT_VALIDATION_FAILURE));
    assert_eq!(stdout_json(&output)["error"]["code"], "validation_error");

    let output = supplyplan(&temp, &["simulate", "--multiplier", "bread=-2"]);
    assert_eq!(output.status.code(), Some(EXIT_VALIDATION_FAILURE));
}
