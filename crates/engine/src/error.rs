//! Error types for the Agent Card engine.

use agentcard_integrations::IntegrationError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evaluator::EvaluationError;

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Workflow definition could not be found or loaded.
    #[error("Workflow load error: {0}")]
    WorkflowLoad(String),

    /// Workflow definition document could not be parsed.
    #[error("Definition parse error: {0}")]
    DefinitionParse(String),

    /// Workflow definition parsed but is not executable.
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// A step failed (integration or decision evaluation raised).
    #[error("Step '{step}' failed: {message}")]
    StepFailure { step: String, message: String },

    /// A decision condition could not be evaluated.
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    /// An external integration call failed.
    #[error("Integration error: {0}")]
    Integration(#[from] IntegrationError),

    /// Anything that escaped the step loop, including panics.
    #[error("Workflow panic: {0}")]
    WorkflowPanic(String),

    /// No active or suspended execution with this id.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// Operation not valid for the execution's current status.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] envy::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    /// Stable name used as `error_type` in execution results.
    pub fn error_type(&self) -> &'static str {
        match self {
            EngineError::WorkflowLoad(_)
            | EngineError::DefinitionParse(_)
            | EngineError::InvalidDefinition(_) => "WorkflowLoadError",
            EngineError::StepFailure { .. } => "StepFailure",
            EngineError::Evaluation(_) => "EvaluationError",
            EngineError::Integration(_) => "IntegrationError",
            EngineError::WorkflowPanic(_) => "WorkflowPanic",
            EngineError::ExecutionNotFound(_) => "ExecutionNotFound",
            EngineError::InvalidState(_) => "InvalidState",
            EngineError::Config(_) => "ConfigError",
            EngineError::Io(_) | EngineError::Json(_) | EngineError::Yaml(_) => "InternalError",
        }
    }
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

/// Why a step attempt failed. Feeds the same retry/skip/abort policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Integration,
    Timeout,
    Evaluation,
    Cancelled,
    Internal,
}

impl From<&IntegrationError> for ErrorKind {
    fn from(e: &IntegrationError) -> Self {
        match e {
            IntegrationError::Timeout(_) => ErrorKind::Timeout,
            IntegrationError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Integration,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Integration => "integration",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Evaluation => "evaluation",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Render an error together with its `source()` chain.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\n  caused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
