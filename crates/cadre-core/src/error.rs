use thiserror::Error;

use crate::plan::GraphViolation;
use crate::types::ModelRole;

#[derive(Debug, Error)]
pub enum CadreError {
    // Graph errors
    #[error("Graph validation failed: {0}")]
    Validation(GraphViolation),

    #[error("Scheduling impossible, unresolved agents: {}", agents.join(", "))]
    SchedulingImpossible { agents: Vec<String> },

    // Model-call errors
    #[error("Model call failed ({role}): {message}")]
    ModelCall { role: ModelRole, message: String },

    #[error("Model call timed out after {timeout_ms}ms ({role})")]
    ModelTimeout { role: ModelRole, timeout_ms: u64 },

    #[error("Invalid model response: {0}")]
    InvalidModelResponse(String),

    #[error("Model provider not supported: {0}")]
    UnsupportedProvider(String),

    // Planning errors
    #[error("Planning failed after {attempts} attempt(s): {reason}")]
    PlanningFailed { attempts: u32, reason: String },

    #[error("Revision exhausted after {attempts} attempt(s): {reason}")]
    RevisionExhausted { attempts: u32, reason: String },

    // Run errors
    #[error("Shared context already holds an artifact for agent: {0}")]
    ContextOverwrite(String),

    #[error("Cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CadreError {
    /// Taxonomy label used in logs, traces, and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation-error",
            Self::SchedulingImpossible { .. } => "scheduling-error",
            Self::ModelCall { .. } | Self::ModelTimeout { .. } | Self::UnsupportedProvider(_) => {
                "model-call-error"
            }
            Self::InvalidModelResponse(_) => "invalid-model-response",
            Self::PlanningFailed { .. } => "planning-error",
            Self::RevisionExhausted { .. } => "revision-exhausted",
            Self::ContextOverwrite(_) => "context-error",
            Self::Cancelled => "cancelled",
            Self::Config(_) | Self::ConfigNotFound(_) => "config-error",
            Self::Io(_) => "io-error",
            Self::Json(_) => "json-error",
        }
    }

    /// Whether a planning or revision attempt that failed with this error
    /// may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::ModelCall { .. }
                | Self::ModelTimeout { .. }
                | Self::InvalidModelResponse(_)
                | Self::Json(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CadreError>;
