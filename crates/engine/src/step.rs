//! Single step execution.

use agentcard_integrations::{IntegrationCallRecord, IntegrationClient};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::context::ExecutionContext;
use crate::definition::StepConfig;
use crate::error::{error_chain, EngineError, ErrorKind};
use crate::evaluator::{DecisionEvaluator, DecisionResult};

/// Decision actions that hand the step to a human.
pub const MANUAL_REVIEW_ACTIONS: &[&str] = &["route_to_manual_review", "manual_review", "escalate"];

/// Outcome of one step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    Skipped,
    /// A failed attempt that was retried.
    Retry,
    ManualReview,
}

impl StepStatus {
    /// Whether the step produced usable output.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Success | Self::ManualReview)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Skipped => write!(f, "skipped"),
            Self::Retry => write!(f, "retry"),
            Self::ManualReview => write!(f, "manual_review"),
        }
    }
}

/// Record of one attempted (or skipped) step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub step_number: u32,
    pub step_name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub input: Map<String, Value>,
    pub output: Map<String, Value>,
    pub integration_calls: Vec<IntegrationCallRecord>,
    pub decision_results: Vec<DecisionResult>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub retry_count: u32,
}

impl StepExecution {
    fn start(step: &StepConfig, input: Map<String, Value>, retry_count: u32) -> Self {
        Self {
            step_id: step.id.clone(),
            step_number: step.step_number,
            step_name: step.display_name().to_string(),
            status: StepStatus::Success,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
            input,
            output: Map::new(),
            integration_calls: Vec::new(),
            decision_results: Vec::new(),
            error: None,
            error_kind: None,
            retry_count,
        }
    }

    /// Record for a step that was never attempted.
    pub fn skipped(step: &StepConfig, reason: &str) -> Self {
        let mut record = Self::start(step, Map::new(), 0);
        record.status = StepStatus::Skipped;
        record.error = Some(reason.to_string());
        record.finish();
        record
    }

    /// Record for a step whose attempt was cut short outside the executor.
    pub fn failed(step: &StepConfig, error: &str, kind: ErrorKind) -> Self {
        let mut record = Self::start(step, Map::new(), 0);
        record.status = StepStatus::Failure;
        record.error = Some(error.to_string());
        record.error_kind = Some(kind);
        record.finish();
        record
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.completed_at = Some(now);
    }

    pub fn is_failure(&self) -> bool {
        self.status == StepStatus::Failure
    }

    /// Names of the keys this step produced.
    pub fn output_keys(&self) -> Vec<String> {
        self.output.keys().cloned().collect()
    }
}

struct StepFailure {
    kind: ErrorKind,
    error: EngineError,
}

/// Runs one step: integration calls, then decision rules, then merge.
pub struct StepExecutor<'a> {
    client: &'a IntegrationClient,
    evaluator: &'a DecisionEvaluator,
}

impl<'a> StepExecutor<'a> {
    pub fn new(client: &'a IntegrationClient, evaluator: &'a DecisionEvaluator) -> Self {
        Self { client, evaluator }
    }

    /// Execute `step` against the context.
    ///
    /// On success the output is merged into `ctx.variables`. On failure the
    /// variables are left untouched and the record carries the error.
    pub async fn execute(
        &self,
        step: &StepConfig,
        ctx: &mut ExecutionContext,
        retry_count: u32,
    ) -> StepExecution {
        let mut record = StepExecution::start(step, ctx.variables.clone(), retry_count);
        let calls_before = self.client.call_count();

        ctx.audit.info(
            "step_started",
            json!({
                "step_id": step.id,
                "step_number": step.step_number,
                "step_name": record.step_name,
                "retry_count": retry_count,
            }),
        );
        tracing::debug!(
            execution_id = %ctx.execution_id,
            step = %step.id,
            retry_count,
            "Executing step"
        );

        let outcome = self.run(step, ctx, &mut record).await;
        record.integration_calls = self.client.calls_since(calls_before);

        match outcome {
            Ok(()) => {
                let manual = record
                    .decision_results
                    .iter()
                    .any(|d| MANUAL_REVIEW_ACTIONS.contains(&d.action.as_str()));
                record.status = if manual {
                    StepStatus::ManualReview
                } else {
                    StepStatus::Success
                };
                ctx.merge_output(&record.output);
                record.finish();

                ctx.audit.info(
                    "step_completed",
                    json!({
                        "step_id": step.id,
                        "step_number": step.step_number,
                        "status": record.status,
                        "duration_ms": record.duration_ms,
                        "output_keys": record.output_keys(),
                    }),
                );
            }
            Err(failure) => {
                record.status = StepStatus::Failure;
                record.error = Some(failure.error.to_string());
                record.error_kind = Some(failure.kind);
                record.finish();

                ctx.audit.error(
                    "step_failed",
                    json!({
                        "step_id": step.id,
                        "step_number": step.step_number,
                        "error": failure.error.to_string(),
                        "error_kind": failure.kind,
                        "trace": error_chain(&failure.error),
                        "retry_count": retry_count,
                    }),
                );
                tracing::warn!(
                    execution_id = %ctx.execution_id,
                    step = %step.id,
                    error_kind = %failure.kind,
                    error = %failure.error,
                    "Step failed"
                );
            }
        }

        record
    }

    async fn run(
        &self,
        step: &StepConfig,
        ctx: &mut ExecutionContext,
        record: &mut StepExecution,
    ) -> Result<(), StepFailure> {
        let operation = step.operation();

        for integration_id in &step.required_integrations {
            let params = ctx.variables.clone();
            match self.client.call(integration_id, operation, params).await {
                Ok(result) => {
                    for (k, v) in result {
                        record.output.insert(k, v);
                    }
                }
                Err(e) => {
                    return Err(StepFailure {
                        kind: ErrorKind::from(&e),
                        error: EngineError::Integration(e),
                    })
                }
            }
        }

        for rule in &step.decision_rules {
            match self.evaluator.evaluate(rule, &ctx.variables, &record.output) {
                Ok(decision) => {
                    if let Some(error) = &decision.error {
                        ctx.audit.warning(
                            "decision_evaluation_failed",
                            json!({
                                "step_id": step.id,
                                "rule_id": rule.id,
                                "condition": rule.condition,
                                "error": error,
                                "policy": self.evaluator.policy(),
                                "result": decision.result,
                            }),
                        );
                    }
                    ctx.audit.info(
                        "decision_evaluated",
                        json!({
                            "step_id": step.id,
                            "rule_id": decision.rule_id,
                            "result": decision.result,
                            "action": decision.action,
                        }),
                    );
                    record.decision_results.push(decision);
                }
                Err(e) => {
                    ctx.audit.warning(
                        "decision_evaluation_failed",
                        json!({
                            "step_id": step.id,
                            "rule_id": rule.id,
                            "condition": rule.condition,
                            "error": e.to_string(),
                            "policy": self.evaluator.policy(),
                        }),
                    );
                    return Err(StepFailure {
                        kind: ErrorKind::Evaluation,
                        error: EngineError::Evaluation(e),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluationFailurePolicy;
    use crate::definition::WorkflowDefinition;
    use crate::evaluator::ExpressionCache;
    use agentcard_integrations::{
        AdapterRegistry, CredentialBag, Credentials, IntegrationAdapter, IntegrationError,
        Operation, Payload,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    struct DownAdapter;

    #[async_trait]
    impl IntegrationAdapter for DownAdapter {
        fn integration_id(&self) -> &str {
            "netsuite"
        }

        async fn call(
            &self,
            _operation: Operation,
            _params: &Payload,
            _credentials: &CredentialBag,
        ) -> Result<Payload, IntegrationError> {
            Err(IntegrationError::CallFailed("503 Service Unavailable".into()))
        }
    }

    fn definition(steps: Value) -> WorkflowDefinition {
        serde_json::from_value(json!({"process_code": "9.2.1.1", "steps": steps})).unwrap()
    }

    fn context(def: &WorkflowDefinition, input: Value, credentials: Credentials) -> ExecutionContext {
        let input = input.as_object().cloned().unwrap_or_default();
        ExecutionContext::new(def, input, credentials)
    }

    fn client(credentials: &Credentials) -> IntegrationClient {
        let mut registry = AdapterRegistry::new();
        registry.register(DownAdapter);
        IntegrationClient::new(credentials.clone(), Arc::new(registry))
    }

    fn evaluator(policy: EvaluationFailurePolicy) -> DecisionEvaluator {
        DecisionEvaluator::new(Arc::new(ExpressionCache::new()), policy)
    }

    #[tokio::test]
    async fn test_successful_step_merges_output() {
        let def = definition(json!([{
            "id": "pay",
            "step_number": 1,
            "step_name": "Pay vendor",
            "required_integrations": ["stripe"],
            "capabilities": ["payment_processing"]
        }]));
        let mut ctx = context(&def, json!({"amount": 250}), Credentials::none());
        let client = client(&ctx.credentials);
        let ev = evaluator(EvaluationFailurePolicy::FailOpen);

        let record = StepExecutor::new(&client, &ev)
            .execute(&def.steps[0], &mut ctx, 0)
            .await;

        assert_eq!(record.status, StepStatus::Success);
        assert_eq!(record.integration_calls.len(), 1);
        assert_eq!(record.integration_calls[0].operation, Operation::ProcessPayment);
        assert_eq!(ctx.get_variable("stripe_payment_status"), Some(&json!("succeeded")));
        assert_eq!(ctx.get_variable("stripe_amount_processed"), Some(&json!(250)));
        assert!(record.completed_at.is_some());

        let events: Vec<&str> = ctx.audit.entries().iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(events, vec!["step_started", "step_completed"]);
    }

    #[tokio::test]
    async fn test_manual_review_from_decision() {
        let def = definition(json!([{
            "id": "approve",
            "step_number": 1,
            "decision_rules": [{
                "id": "high_value",
                "condition": "amount > threshold",
                "default_threshold": 1000,
                "action_if_true": "route_to_manual_review",
                "action_if_false": "auto_approve"
            }]
        }]));
        let mut ctx = context(&def, json!({"amount": 1500}), Credentials::none());
        let client = client(&ctx.credentials);
        let ev = evaluator(EvaluationFailurePolicy::FailOpen);

        let record = StepExecutor::new(&client, &ev)
            .execute(&def.steps[0], &mut ctx, 0)
            .await;

        assert_eq!(record.status, StepStatus::ManualReview);
        assert_eq!(record.decision_results.len(), 1);
        assert!(record.decision_results[0].result);
    }

    #[tokio::test]
    async fn test_integration_failure_stops_step() {
        let def = definition(json!([{
            "id": "sync",
            "step_number": 1,
            "required_integrations": ["netsuite", "stripe"],
            "decision_rules": [{"id": "r", "condition": "true"}]
        }]));
        let credentials = Credentials::none().with("netsuite", CredentialBag::new().with("key", "k"));
        let mut ctx = context(&def, json!({}), credentials);
        let client = client(&ctx.credentials);
        let ev = evaluator(EvaluationFailurePolicy::FailOpen);

        let record = StepExecutor::new(&client, &ev)
            .execute(&def.steps[0], &mut ctx, 2)
            .await;

        assert_eq!(record.status, StepStatus::Failure);
        assert_eq!(record.error_kind, Some(ErrorKind::Integration));
        assert_eq!(record.retry_count, 2);
        assert_eq!(record.integration_calls.len(), 1);
        assert!(record.decision_results.is_empty());
        assert!(record.error.as_deref().unwrap().contains("503"));
        assert!(ctx.variables.is_empty());

        let failed = ctx.audit.entries().last().unwrap();
        assert_eq!(failed.event_type, "step_failed");
        assert!(failed.details.contains_key("trace"));
    }

    #[tokio::test]
    async fn test_fail_step_policy() {
        let def = definition(json!([{
            "id": "check",
            "step_number": 1,
            "decision_rules": [{"id": "bad", "condition": "unknown_field > 3"}]
        }]));
        let mut ctx = context(&def, json!({}), Credentials::none());
        let client = client(&ctx.credentials);
        let ev = evaluator(EvaluationFailurePolicy::FailStep);

        let record = StepExecutor::new(&client, &ev)
            .execute(&def.steps[0], &mut ctx, 0)
            .await;

        assert_eq!(record.status, StepStatus::Failure);
        assert_eq!(record.error_kind, Some(ErrorKind::Evaluation));
        assert!(ctx
            .audit
            .entries()
            .iter()
            .any(|e| e.event_type == "decision_evaluation_failed"));
    }

    #[tokio::test]
    async fn test_fail_open_records_error() {
        let def = definition(json!([{
            "id": "check",
            "step_number": 1,
            "decision_rules": [{"id": "bad", "condition": "unknown_field > 3", "action_if_true": "proceed"}]
        }]));
        let mut ctx = context(&def, json!({}), Credentials::none());
        let client = client(&ctx.credentials);
        let ev = evaluator(EvaluationFailurePolicy::FailOpen);

        let record = StepExecutor::new(&client, &ev)
            .execute(&def.steps[0], &mut ctx, 0)
            .await;

        assert_eq!(record.status, StepStatus::Success);
        assert!(record.decision_results[0].error.is_some());
        assert!(ctx
            .audit
            .entries()
            .iter()
            .any(|e| e.event_type == "decision_evaluation_failed"));
    }

    #[test]
    fn test_skipped_record() {
        let def = definition(json!([{"id": "a", "step_number": 4, "step_name": "Archive"}]));
        let record = StepExecution::skipped(&def.steps[0], "workflow aborted");
        assert_eq!(record.status, StepStatus::Skipped);
        assert_eq!(record.step_number, 4);
        assert_eq!(record.error.as_deref(), Some("workflow aborted"));
        assert!(record.completed_at.is_some());
    }
}
