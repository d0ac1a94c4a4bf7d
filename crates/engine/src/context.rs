//! Execution context for a single workflow run.

use agentcard_integrations::Credentials;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::audit::AuditLogger;
use crate::definition::WorkflowDefinition;
use crate::error::{error_chain, EngineError};

/// Lifecycle of an execution.
///
/// `PENDING → RUNNING → {WAITING_APPROVAL} → COMPLETED | FAILED | CANCELLED`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    WaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::WaitingApproval => write!(f, "WAITING_APPROVAL"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A workflow-level error as it appears in the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    /// Source chain of the error, or the panic payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            step_number: None,
            step_name: None,
            trace: None,
            timestamp: Utc::now(),
        }
    }

    pub fn from_error(err: &EngineError) -> Self {
        let chain = error_chain(err);
        Self {
            error_type: err.error_type().to_string(),
            message: err.to_string(),
            step_number: None,
            step_name: None,
            trace: (chain != err.to_string()).then_some(chain),
            timestamp: Utc::now(),
        }
    }

    pub fn at_step(mut self, step_number: u32, step_name: impl Into<String>) -> Self {
        self.step_number = Some(step_number);
        self.step_name = Some(step_name.into());
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

/// Mutable state of one workflow run.
///
/// Owned exclusively by the run driving it. Converted into an
/// [`ExecutionResult`](crate::result::ExecutionResult) when the run ends
/// or pauses.
#[derive(Debug)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub workflow_id: String,
    pub process_code: String,
    pub process_name: String,

    /// Caller's original input, never modified.
    pub input_data: Map<String, Value>,

    /// Accumulated step outputs; later steps may overwrite earlier keys.
    pub variables: Map<String, Value>,

    /// Per-integration secrets. Never serialized.
    pub credentials: Credentials,

    /// Index of the step being executed (0-based).
    pub current_step: usize,
    pub total_steps: usize,
    pub status: ExecutionStatus,
    pub errors: Vec<ErrorRecord>,
    pub audit: AuditLogger,
    pub started_at: DateTime<Utc>,
}

impl ExecutionContext {
    /// Create a context with a fresh execution id.
    pub fn new(
        definition: &WorkflowDefinition,
        input_data: Map<String, Value>,
        credentials: Credentials,
    ) -> Self {
        let execution_id = Uuid::new_v4().to_string();
        Self {
            audit: AuditLogger::new(execution_id.clone()),
            execution_id,
            workflow_id: definition.workflow_id().to_string(),
            process_code: definition.process_code.clone(),
            process_name: definition.name.clone(),
            variables: input_data.clone(),
            input_data,
            credentials,
            current_step: 0,
            total_steps: definition.total_steps(),
            status: ExecutionStatus::Pending,
            errors: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Merge a step's output into the variables, overwriting existing keys.
    pub fn merge_output(&mut self, output: &Map<String, Value>) {
        for (k, v) in output {
            self.variables.insert(k.clone(), v.clone());
        }
    }

    pub fn record_error(&mut self, record: ErrorRecord) {
        self.errors.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcard_integrations::IntegrationError;
    use serde_json::json;

    fn definition() -> WorkflowDefinition {
        serde_json::from_value(json!({
            "process_code": "9.2.1.1",
            "name": "Process accounts payable",
            "steps": [{"id": "a", "step_number": 1}, {"id": "b", "step_number": 2}]
        }))
        .unwrap()
    }

    #[test]
    fn test_new_context() {
        let input = json!({"invoice_id": "INV-1"}).as_object().cloned().unwrap();
        let ctx = ExecutionContext::new(&definition(), input, Credentials::none());

        assert_eq!(ctx.status, ExecutionStatus::Pending);
        assert_eq!(ctx.total_steps, 2);
        assert_eq!(ctx.workflow_id, "9.2.1.1");
        assert_eq!(ctx.variables, ctx.input_data);
        assert_eq!(ctx.audit.execution_id(), ctx.execution_id);
        assert!(Uuid::parse_str(&ctx.execution_id).is_ok());
    }

    #[test]
    fn test_unique_execution_ids() {
        let a = ExecutionContext::new(&definition(), Map::new(), Credentials::none());
        let b = ExecutionContext::new(&definition(), Map::new(), Credentials::none());
        assert_ne!(a.execution_id, b.execution_id);
    }

    #[test]
    fn test_merge_leaves_input_untouched() {
        let input = json!({"amount": 10}).as_object().cloned().unwrap();
        let mut ctx = ExecutionContext::new(&definition(), input, Credentials::none());
        let output = json!({"amount": 20, "approved": true}).as_object().cloned().unwrap();
        ctx.merge_output(&output);

        assert_eq!(ctx.get_variable("amount"), Some(&json!(20)));
        assert_eq!(ctx.input_data.get("amount"), Some(&json!(10)));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(ExecutionStatus::WaitingApproval).unwrap(),
            json!("WAITING_APPROVAL")
        );
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::WaitingApproval.is_terminal());
    }

    #[test]
    fn test_error_record_trace() {
        let err: EngineError = IntegrationError::CallFailed("timeout talking to bank".into()).into();
        let record = ErrorRecord::from_error(&err).at_step(3, "Reconcile");
        assert_eq!(record.error_type, "IntegrationError");
        assert_eq!(record.step_number, Some(3));
        assert!(record.trace.unwrap().contains("caused by"));

        let record = ErrorRecord::from_error(&EngineError::WorkflowLoad("missing".into()));
        assert!(record.trace.is_none());
    }
}
