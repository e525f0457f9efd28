use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::PlanError;
use crate::utils::time::Timestamp;

pub const ENVELOPE_SCHEMA_VERSION: &str = "supplyplan.envelope.v1";

pub type EnvelopeMeta = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeNotice {
    pub code: String,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Uniform JSON wrapper printed by every command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub ok: bool,
    pub command: String,
    pub generated_at_utc: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    pub meta: EnvelopeMeta,
    pub warnings: Vec<EnvelopeNotice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeNotice>,
}

/// Carries a failed envelope through `anyhow` so `main` can both print it and
/// pick an exit code from the original error class.
#[derive(Debug, Clone)]
pub struct EnvelopeFailure {
    envelope: Envelope,
    retryable: bool,
}

impl EnvelopeFailure {
    #[must_use]
    pub fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            retryable: false,
        }
    }

    #[must_use]
    pub fn from_plan_error(command: &str, error: &PlanError) -> Self {
        let mut details = json!({ "retryable": error.is_retryable() });
        match error {
            PlanError::Storage { source, .. } => {
                details["cause"] = json!(source.to_string());
            }
            PlanError::SafetyRejected(violation) => {
                details["violation"] = serde_json::to_value(violation).unwrap_or(Value::Null);
            }
            PlanError::Validation(_) | PlanError::NotFound(_) => {}
        }
        Self {
            envelope: Envelope::error(command, error.code(), error.to_string())
                .with_error_details(details),
            retryable: error.is_retryable(),
        }
    }

    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.envelope.error.as_ref().map(|error| error.code.as_str())
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl Display for EnvelopeFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(&self.envelope) {
            Ok(encoded) => f.write_str(&encoded),
            Err(_) => f.write_str("envelope serialization failure"),
        }
    }
}

impl std::error::Error for EnvelopeFailure {}

impl Envelope {
    #[must_use]
    pub fn ok(command: impl Into<String>, data: Value) -> Self {
        let mut envelope = Self::base(command, true);
        envelope.data = Some(data);
        envelope
    }

    #[must_use]
    pub fn error(
        command: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut envelope = Self::base(command, false);
        envelope.error = Some(EnvelopeNotice {
            code: code.into(),
            message: message.into(),
            details: None,
        });
        envelope
    }

    fn base(command: impl Into<String>, ok: bool) -> Self {
        let mut meta = EnvelopeMeta::new();
        meta.insert("schema_version".to_string(), json!(ENVELOPE_SCHEMA_VERSION));

        Self {
            ok,
            command: command.into(),
            generated_at_utc: Timestamp::now().utc_millis(),
            data: None,
            meta,
            warnings: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_warning(
        mut self,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        self.warnings.push(EnvelopeNotice {
            code: code.into(),
            message: message.into(),
            details,
        });
        self
    }

    #[must_use]
    pub fn with_error_details(mut self, details: Value) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.details = Some(details);
        }
        self
    }
}
