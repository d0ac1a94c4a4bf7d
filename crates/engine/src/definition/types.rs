//! Workflow definition types ("agent cards").
//!
//! A definition is an ordered list of steps. Each step names the integrations
//! it needs, the capabilities it exercises, the decision rules evaluated on its
//! output and the error handlers consulted when it fails.

use agentcard_integrations::Operation;
use serde::{Deserialize, Serialize};

/// A complete workflow definition, identified by its process code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow identifier. Defaults to the process code when absent.
    #[serde(default)]
    pub id: String,

    /// Opaque process code, e.g. "9.2.1.1".
    #[serde(default, alias = "apqc_code", alias = "code")]
    pub process_code: String,

    /// Human-readable process name.
    #[serde(default, alias = "apqc_name")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Steps in execution order.
    #[serde(alias = "workflow")]
    pub steps: Vec<StepConfig>,
}

impl WorkflowDefinition {
    /// The workflow id, falling back to the process code.
    pub fn workflow_id(&self) -> &str {
        if self.id.is_empty() {
            &self.process_code
        } else {
            &self.id
        }
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn get_step(&self, id: &str) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// One step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub id: String,

    /// Ordinal position; steps run in ascending order.
    pub step_number: u32,

    #[serde(default, alias = "name")]
    pub step_name: String,

    #[serde(default)]
    pub required_integrations: Vec<String>,

    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub decision_rules: Vec<DecisionRule>,

    #[serde(default)]
    pub error_handlers: Vec<ErrorHandler>,
}

impl StepConfig {
    /// Operation invoked on each required integration.
    pub fn operation(&self) -> Operation {
        Operation::resolve(&self.capabilities)
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.step_name.is_empty() {
            &self.id
        } else {
            &self.step_name
        }
    }
}

/// A boolean business rule selecting one of two actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRule {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Condition expression, e.g. `amount > threshold AND vendor_verified`.
    pub condition: String,

    #[serde(default, alias = "threshold", skip_serializing_if = "Option::is_none")]
    pub default_threshold: Option<f64>,

    #[serde(default = "default_action")]
    pub action_if_true: String,

    #[serde(default = "default_action")]
    pub action_if_false: String,
}

fn default_action() -> String {
    "proceed".to_string()
}

/// Failure policy entry for a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHandler {
    pub action: ErrorAction,

    #[serde(default)]
    pub max_retries: u32,
}

impl ErrorHandler {
    pub fn retry(max_retries: u32) -> Self {
        Self {
            action: ErrorAction::Retry,
            max_retries,
        }
    }

    pub fn of(action: ErrorAction) -> Self {
        Self {
            action,
            max_retries: 0,
        }
    }
}

/// Action taken by an error handler.
///
/// Unrecognized actions are preserved and treated as halting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorAction {
    Retry,
    Skip,
    Escalate,
    Abort,
    Other(String),
}

impl From<String> for ErrorAction {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "retry" => ErrorAction::Retry,
            "skip" => ErrorAction::Skip,
            "escalate" => ErrorAction::Escalate,
            "abort" => ErrorAction::Abort,
            _ => ErrorAction::Other(s),
        }
    }
}

impl From<ErrorAction> for String {
    fn from(a: ErrorAction) -> Self {
        a.to_string()
    }
}

impl std::fmt::Display for ErrorAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorAction::Retry => write!(f, "retry"),
            ErrorAction::Skip => write!(f, "skip"),
            ErrorAction::Escalate => write!(f, "escalate"),
            ErrorAction::Abort => write!(f, "abort"),
            ErrorAction::Other(s) => write!(f, "{}", s),
        }
    }
}
