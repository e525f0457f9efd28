use thiserror::Error;

use crate::guard::GuardViolation;

pub type Result<T> = std::result::Result<T, PlanError>;

/// Failure taxonomy shared by the run store and the engines.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("query rejected by safety gate: {0}")]
    SafetyRejected(GuardViolation),

    #[error("storage error: {context}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },
}

impl PlanError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Only storage failures are worth retrying; everything else is a caller problem.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::SafetyRejected(_) => "safety_rejected",
            Self::Storage { .. } => "storage_error",
        }
    }
}

/// Attaches a human-readable context to a raw sqlite failure.
pub trait StorageContext<T> {
    fn storage_context(self, context: impl Into<String>) -> Result<T>;

    fn with_storage_context<F, S>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> StorageContext<T> for std::result::Result<T, rusqlite::Error> {
    fn storage_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| PlanError::Storage {
            context: context.into(),
            source,
        })
    }

    fn with_storage_context<F, S>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| PlanError::Storage {
            context: context().into(),
            source,
        })
    }
}
