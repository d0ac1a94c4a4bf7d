//! Execution result document.

use agentcard_integrations::IntegrationCallRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::audit::AuditLogEntry;
use crate::context::{ErrorRecord, ExecutionContext, ExecutionStatus};
use crate::error::{EngineError, ErrorKind};
use crate::evaluator::DecisionResult;
use crate::step::{StepExecution, StepStatus, MANUAL_REVIEW_ACTIONS};

/// Per-step entry of the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
    pub step_id: String,
    pub step_number: u32,
    pub step_name: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub output_keys: Vec<String>,
    pub decision_results: Vec<DecisionResult>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&StepExecution> for StepSummary {
    fn from(step: &StepExecution) -> Self {
        Self {
            step_id: step.step_id.clone(),
            step_number: step.step_number,
            step_name: step.step_name.clone(),
            status: step.status,
            duration_ms: step.duration_ms,
            output_keys: step.output_keys(),
            decision_results: step.decision_results.clone(),
            error: step.error.clone(),
            error_kind: step.error_kind,
            retry_count: step.retry_count,
            started_at: step.started_at,
            completed_at: step.completed_at,
        }
    }
}

/// The step an execution is paused on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub step_id: String,
    pub step_number: u32,
    pub step_name: String,
    /// Decision actions that requested review.
    pub actions: Vec<String>,
    pub requested_at: DateTime<Utc>,
}

impl PendingApproval {
    pub fn for_step(step: &StepExecution) -> Self {
        let mut actions: Vec<String> = Vec::new();
        for decision in &step.decision_results {
            if MANUAL_REVIEW_ACTIONS.contains(&decision.action.as_str())
                && !actions.contains(&decision.action)
            {
                actions.push(decision.action.clone());
            }
        }

        Self {
            step_id: step.step_id.clone(),
            step_number: step.step_number,
            step_name: step.step_name.clone(),
            actions,
            requested_at: Utc::now(),
        }
    }
}

/// Complete, immutable outcome of an execution (or of a paused one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub execution_id: String,
    pub workflow_id: String,
    pub apqc_code: String,
    pub apqc_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_duration_ms: u64,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub step_executions: Vec<StepSummary>,
    pub final_output: Map<String, Value>,
    pub integration_calls: Vec<IntegrationCallRecord>,
    pub audit_log: Vec<AuditLogEntry>,
    pub errors: Vec<ErrorRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_approval: Option<PendingApproval>,
}

impl ExecutionResult {
    /// Assemble the result from a run's state.
    pub fn build(
        ctx: &ExecutionContext,
        steps: &[StepExecution],
        integration_calls: Vec<IntegrationCallRecord>,
        pending_approval: Option<PendingApproval>,
    ) -> Self {
        let now = Utc::now();
        let completed_at = ctx.status.is_terminal().then_some(now);

        Self {
            success: ctx.status == ExecutionStatus::Completed,
            execution_id: ctx.execution_id.clone(),
            workflow_id: ctx.workflow_id.clone(),
            apqc_code: ctx.process_code.clone(),
            apqc_name: ctx.process_name.clone(),
            status: ctx.status,
            started_at: ctx.started_at,
            completed_at,
            total_duration_ms: (now - ctx.started_at).num_milliseconds().max(0) as u64,
            steps_completed: steps.iter().filter(|s| s.status.is_completed()).count(),
            total_steps: ctx.total_steps,
            step_executions: steps.iter().map(StepSummary::from).collect(),
            final_output: ctx.variables.clone(),
            integration_calls,
            audit_log: ctx.audit.entries().to_vec(),
            errors: ctx.errors.clone(),
            pending_approval,
        }
    }

    /// Result for a definition that could not be loaded; no step ran.
    pub fn load_failure(process_code: &str, err: &EngineError) -> Self {
        let now = Utc::now();
        Self {
            success: false,
            execution_id: Uuid::new_v4().to_string(),
            workflow_id: process_code.to_string(),
            apqc_code: process_code.to_string(),
            apqc_name: String::new(),
            status: ExecutionStatus::Failed,
            started_at: now,
            completed_at: Some(now),
            total_duration_ms: 0,
            steps_completed: 0,
            total_steps: 0,
            step_executions: Vec::new(),
            final_output: Map::new(),
            integration_calls: Vec::new(),
            audit_log: Vec::new(),
            errors: vec![ErrorRecord::from_error(err)],
            pending_approval: None,
        }
    }

    pub fn is_waiting_approval(&self) -> bool {
        self.status == ExecutionStatus::WaitingApproval
    }

    pub fn step(&self, step_id: &str) -> Option<&StepSummary> {
        self.step_executions.iter().rev().find(|s| s.step_id == step_id)
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_failure_shape() {
        let err = EngineError::WorkflowLoad("No workflow definition found for process code '0.0'".into());
        let result = ExecutionResult::load_failure("0.0", &err);

        assert!(!result.success);
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.step_executions.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].error_type, "WorkflowLoadError");

        let json = result.to_json().unwrap();
        assert_eq!(json["status"], json!("FAILED"));
        assert_eq!(json["apqc_code"], json!("0.0"));
        assert!(json.get("pending_approval").is_none());
    }

    #[test]
    fn test_pending_approval_actions_unique() {
        let step: crate::definition::StepConfig =
            serde_json::from_value(json!({"id": "review", "step_number": 2})).unwrap();
        let mut record = StepExecution::skipped(&step, "placeholder");
        for action in ["route_to_manual_review", "escalate", "proceed", "route_to_manual_review"] {
            record.decision_results.push(DecisionResult {
                rule_id: format!("r-{}", action),
                rule_name: String::new(),
                condition: "true".into(),
                threshold: None,
                result: true,
                action: action.into(),
                error: None,
            });
        }

        let pending = PendingApproval::for_step(&record);
        assert_eq!(
            pending.actions,
            vec!["route_to_manual_review".to_string(), "escalate".to_string()]
        );
    }

    #[test]
    fn test_pretty_json_roundtrip() {
        let err = EngineError::WorkflowLoad("missing".into());
        let result = ExecutionResult::load_failure("1.2", &err);
        let text = result.to_json_pretty().unwrap();
        let back: ExecutionResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back.execution_id, result.execution_id);
    }
}
