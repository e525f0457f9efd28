pub mod envelope;
pub mod run;

pub use envelope::{ENVELOPE_SCHEMA_VERSION, Envelope, EnvelopeFailure, EnvelopeMeta, EnvelopeNotice};
pub use run::{
    ALERT_TYPE_EXPIRY, ALERT_TYPE_STOCKOUT, Forecast, ProductionPlan, RawMaterialOrder, RiskAlert,
    Run, RunAnalysis, RunSnapshot, analysis_json_schema, validate_run_id,
};
