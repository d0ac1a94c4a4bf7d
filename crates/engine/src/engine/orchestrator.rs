//! Workflow orchestration.
//!
//! Drives one execution from its definition to a terminal state (or to a
//! pause awaiting approval):
//! - Loads the definition from the catalog
//! - Runs steps strictly in order through the [`StepExecutor`]
//! - Resolves step failures against the step's error handlers
//! - Assembles the [`ExecutionResult`]

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use agentcard_integrations::{
    AdapterRegistry, CallMode, CancelHandle, CancelSignal, Credentials, IntegrationClient,
};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audit::AuditLevel;
use crate::config::{ApprovalMode, EngineConfig, RetryBackoff};
use crate::context::{ErrorRecord, ExecutionContext, ExecutionStatus};
use crate::definition::{ErrorAction, StepConfig, WorkflowCatalog, WorkflowDefinition};
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::evaluator::{DecisionEvaluator, ExpressionCache};
use crate::result::{ExecutionResult, PendingApproval};
use crate::step::{StepExecution, StepExecutor, StepStatus};

use super::escalation::{EscalationEvent, EscalationHook, LoggingEscalationHook};
use super::registry::{ExecutionRegistry, ExecutionSnapshot, SuspendedExecutions};

/// External decision on a paused execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ApprovalDecision {
    pub fn approve(approver: impl Into<String>) -> Self {
        Self {
            approved: true,
            approver: Some(approver.into()),
            comment: None,
        }
    }

    pub fn reject(approver: impl Into<String>) -> Self {
        Self {
            approved: false,
            approver: Some(approver.into()),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Aborts the caller-signal forwarding task when the run is dropped.
struct CancelForwarder(JoinHandle<()>);

impl Drop for CancelForwarder {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Complete state of one execution between steps.
pub(crate) struct Run {
    definition: Arc<WorkflowDefinition>,
    ctx: ExecutionContext,
    client: IntegrationClient,
    steps: Vec<StepExecution>,
    /// Index of the next step to run.
    next_step: usize,
    /// Retry count of the attempt in flight.
    attempt: u32,
    cancel: CancelSignal,
    pending: Option<PendingApproval>,
    _forwarder: Option<CancelForwarder>,
}

enum StepOutcome {
    Completed,
    ManualReview(PendingApproval),
    /// Failed, but a `skip` handler accepted the failure.
    Resolved,
    Halted,
    Cancelled,
}

/// The workflow engine.
///
/// Cheap to clone; clones share the definition catalog, the adapter
/// registry, the expression cache and the execution registries. Each
/// execution owns its own context, audit log and integration client.
#[derive(Clone)]
pub struct WorkflowEngine {
    catalog: WorkflowCatalog,
    adapters: Arc<AdapterRegistry>,
    config: Arc<EngineConfig>,
    expressions: Arc<ExpressionCache>,
    registry: ExecutionRegistry,
    suspended: SuspendedExecutions<Run>,
    escalation: Arc<dyn EscalationHook>,
}

impl WorkflowEngine {
    /// Create an engine. Definitions are read lazily from
    /// `config.definitions_dir` when set.
    pub fn new(config: EngineConfig) -> Self {
        let catalog = match &config.definitions_dir {
            Some(dir) => WorkflowCatalog::with_dir(dir),
            None => WorkflowCatalog::new(),
        };

        Self {
            catalog,
            adapters: Arc::new(AdapterRegistry::new()),
            config: Arc::new(config),
            expressions: Arc::new(ExpressionCache::new()),
            registry: ExecutionRegistry::new(),
            suspended: SuspendedExecutions::new(),
            escalation: Arc::new(LoggingEscalationHook),
        }
    }

    /// Create an engine from `AGENTCARD_*` environment variables.
    pub fn from_env() -> EngineResult<Self> {
        Ok(Self::new(EngineConfig::load()?))
    }

    pub fn with_catalog(mut self, catalog: WorkflowCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Live adapters used for integrations that have credentials.
    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = Arc::new(adapters);
        self
    }

    pub fn with_escalation_hook(mut self, hook: impl EscalationHook + 'static) -> Self {
        self.escalation = Arc::new(hook);
        self
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute the workflow registered under `process_code`.
    ///
    /// Never fails: load errors, step failures and panics are all reported
    /// in the returned result.
    pub async fn execute(
        &self,
        process_code: &str,
        input: Map<String, Value>,
        credentials: Credentials,
    ) -> ExecutionResult {
        self.start(process_code, input, credentials, None).await
    }

    /// Like [`execute`](Self::execute), additionally stopping when `signal` fires.
    pub async fn execute_with_cancel(
        &self,
        process_code: &str,
        input: Map<String, Value>,
        credentials: Credentials,
        signal: CancelSignal,
    ) -> ExecutionResult {
        self.start(process_code, input, credentials, Some(signal))
            .await
    }

    /// Continue a paused execution with an approval decision.
    pub async fn resume(
        &self,
        execution_id: &str,
        decision: ApprovalDecision,
    ) -> EngineResult<ExecutionResult> {
        let Some(mut run) = self.suspended.take(execution_id).await else {
            return Err(match self.registry.get(execution_id).await {
                Some(snapshot) => EngineError::InvalidState(format!(
                    "Execution {} is {}, not WAITING_APPROVAL",
                    execution_id, snapshot.status
                )),
                None => EngineError::ExecutionNotFound(execution_id.to_string()),
            });
        };

        let pending = run.pending.take();
        let details = json!({
            "approved": decision.approved,
            "approver": decision.approver,
            "comment": decision.comment,
            "step_id": pending.as_ref().map(|p| p.step_id.clone()),
        });
        run.ctx.set_variable(
            "approval_decision",
            json!({
                "approved": decision.approved,
                "approver": decision.approver,
                "comment": decision.comment,
            }),
        );

        if run.cancel.is_cancelled() {
            self.mark_cancelled(&mut run);
            return Ok(self.finish(run).await);
        }

        if decision.approved {
            info!(execution_id = %execution_id, approver = ?decision.approver, "Approval granted, resuming");
            run.ctx.audit.info("approval_granted", details);
            run.ctx.status = ExecutionStatus::Running;
            self.registry.update(&run.ctx).await;
            Ok(self.advance(run).await)
        } else {
            info!(execution_id = %execution_id, approver = ?decision.approver, "Approval rejected");
            run.ctx.audit.warning("approval_rejected", details);
            run.ctx.status = ExecutionStatus::Failed;
            let mut record = ErrorRecord::new(
                "ApprovalRejected",
                match &decision.comment {
                    Some(comment) => format!("Approval rejected: {}", comment),
                    None => "Approval rejected".to_string(),
                },
            );
            if let Some(p) = &pending {
                record = record.at_step(p.step_number, p.step_name.clone());
            }
            run.ctx.record_error(record);
            account_for_remaining(&mut run, "approval rejected");
            Ok(self.finish(run).await)
        }
    }

    /// Status of a running or paused execution.
    pub async fn status(&self, execution_id: &str) -> Option<ExecutionSnapshot> {
        self.registry.get(execution_id).await
    }

    pub async fn active_executions(&self) -> Vec<ExecutionSnapshot> {
        self.registry.list().await
    }

    /// Ids of executions waiting for approval.
    ///
    /// A paused execution is held in memory until it is resumed, cancelled
    /// or expired with [`expire_suspended`](Self::expire_suspended).
    pub async fn suspended_executions(&self) -> Vec<String> {
        self.suspended.ids().await
    }

    /// Finalise every execution that has waited for approval for at least
    /// `max_age`. Each ends `CANCELLED` with an `ApprovalExpired` error.
    pub async fn expire_suspended(&self, max_age: Duration) -> Vec<ExecutionResult> {
        let mut results = Vec::new();
        for (execution_id, mut run) in self.suspended.take_expired(max_age).await {
            warn!(execution_id = %execution_id, "Approval wait expired");
            let max_age_ms = max_age.as_millis() as u64;
            run.ctx.audit.warning(
                "approval_expired",
                json!({
                    "step_id": run.pending.as_ref().map(|p| p.step_id.clone()),
                    "max_age_ms": max_age_ms,
                }),
            );
            run.ctx.status = ExecutionStatus::Cancelled;
            let mut record = ErrorRecord::new(
                "ApprovalExpired",
                format!("No approval decision within {} ms", max_age_ms),
            );
            if let Some(p) = &run.pending {
                record = record.at_step(p.step_number, p.step_name.clone());
            }
            run.ctx.record_error(record);
            account_for_remaining(&mut run, "approval expired");
            results.push(self.finish(run).await);
        }
        results
    }

    /// Cancel an execution.
    ///
    /// A running execution stops at its next suspension point and its
    /// caller receives the `CANCELLED` result. A paused execution is
    /// finalised immediately and its result returned here.
    pub async fn cancel(&self, execution_id: &str) -> EngineResult<Option<ExecutionResult>> {
        if let Some(mut run) = self.suspended.take(execution_id).await {
            info!(execution_id = %execution_id, "Cancelling suspended execution");
            self.mark_cancelled(&mut run);
            return Ok(Some(self.finish(run).await));
        }

        if self.registry.cancel(execution_id).await {
            info!(execution_id = %execution_id, "Cancellation requested");
            Ok(None)
        } else {
            Err(EngineError::ExecutionNotFound(execution_id.to_string()))
        }
    }

    async fn start(
        &self,
        process_code: &str,
        input: Map<String, Value>,
        credentials: Credentials,
        signal: Option<CancelSignal>,
    ) -> ExecutionResult {
        let definition = match self.catalog.get(process_code).await {
            Ok(definition) => definition,
            Err(e) => {
                error!(process_code = %process_code, error = %e, "Failed to load workflow definition");
                return ExecutionResult::load_failure(process_code, &e);
            }
        };

        let mut ctx = ExecutionContext::new(&definition, input, credentials);
        let handle = CancelHandle::new();
        let forwarder = signal.map(|s| forward_cancellation(s, handle.clone()));
        let client = IntegrationClient::new(ctx.credentials.clone(), Arc::clone(&self.adapters))
            .with_timeout(self.config.call_timeout())
            .with_cancel_signal(handle.signal());

        let mut integrations: Vec<&str> = definition
            .steps
            .iter()
            .flat_map(|s| s.required_integrations.iter().map(String::as_str))
            .collect();
        integrations.sort_unstable();
        integrations.dedup();
        let modes: Map<String, Value> = integrations
            .iter()
            .map(|id| {
                let mode = client.mode_for(id);
                (id.to_string(), json!(mode))
            })
            .collect();

        ctx.audit.info(
            "workflow_started",
            json!({
                "workflow_id": ctx.workflow_id,
                "process_code": ctx.process_code,
                "process_name": ctx.process_name,
                "total_steps": ctx.total_steps,
                "input_keys": ctx.input_data.keys().collect::<Vec<_>>(),
                "integration_modes": modes,
            }),
        );
        ctx.status = ExecutionStatus::Running;

        let live = modes.values().filter(|m| **m == json!(CallMode::Live)).count();
        info!(
            execution_id = %ctx.execution_id,
            process_code = %ctx.process_code,
            steps = ctx.total_steps,
            live_integrations = live,
            "Workflow started"
        );

        self.registry.insert(&ctx, handle.clone()).await;

        let run = Run {
            definition,
            ctx,
            client,
            steps: Vec::new(),
            next_step: 0,
            attempt: 0,
            cancel: handle.signal(),
            pending: None,
            _forwarder: forwarder,
        };
        self.advance(run).await
    }

    /// Drive the run until it pauses or ends. Panics are contained here.
    async fn advance(&self, mut run: Run) -> ExecutionResult {
        let outcome = AssertUnwindSafe(self.drive(&mut run)).catch_unwind().await;

        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            error!(execution_id = %run.ctx.execution_id, panic = %message, "Workflow panicked");

            let err = EngineError::WorkflowPanic(message.clone());
            run.ctx.audit.error(
                "workflow_panic",
                json!({"error": err.to_string(), "step_index": run.next_step}),
            );
            let mut record = ErrorRecord::from_error(&err).with_trace(message.clone());

            if let Some(step) = run.definition.steps.get(run.next_step).cloned() {
                record = record.at_step(step.step_number, step.display_name());
                // The attempt that panicked has no record yet unless an
                // earlier attempt of this step already settled.
                let settled = run
                    .steps
                    .iter()
                    .rev()
                    .find(|s| s.step_id == step.id)
                    .is_some_and(|s| s.status != StepStatus::Retry);
                if !settled {
                    let mut failed = StepExecution::failed(&step, &message, ErrorKind::Internal);
                    failed.retry_count = run.attempt;
                    run.steps.push(failed);
                }
            }
            run.ctx.record_error(record);
            run.ctx.status = ExecutionStatus::Failed;
            account_for_remaining(&mut run, "workflow panicked");
        }

        if run.ctx.status == ExecutionStatus::WaitingApproval {
            self.suspend(run).await
        } else {
            self.finish(run).await
        }
    }

    async fn drive(&self, run: &mut Run) {
        let definition = Arc::clone(&run.definition);
        let backoff = self.config.retry_backoff();

        while let Some(step) = definition.steps.get(run.next_step) {
            if run.cancel.is_cancelled() {
                self.mark_cancelled(run);
                return;
            }

            run.ctx.current_step = run.next_step;
            self.registry.update(&run.ctx).await;
            debug!(
                execution_id = %run.ctx.execution_id,
                step = %step.id,
                index = run.next_step,
                "Running step"
            );

            match self.run_step(run, step, &backoff).await {
                StepOutcome::Completed | StepOutcome::Resolved => run.next_step += 1,
                StepOutcome::ManualReview(pending) => {
                    run.next_step += 1;
                    run.ctx.status = ExecutionStatus::WaitingApproval;
                    self.registry.update(&run.ctx).await;
                    run.ctx.audit.warning(
                        "awaiting_approval",
                        json!({
                            "step_id": pending.step_id,
                            "step_number": pending.step_number,
                            "actions": pending.actions,
                            "mode": self.config.approval_mode,
                        }),
                    );

                    match self.config.approval_mode {
                        ApprovalMode::Suspend => {
                            run.pending = Some(pending);
                            return;
                        }
                        ApprovalMode::Continue => {
                            run.ctx.status = ExecutionStatus::Running;
                        }
                    }
                }
                StepOutcome::Halted => {
                    run.ctx.status = ExecutionStatus::Failed;
                    account_for_remaining(run, "workflow halted after an unresolved step failure");
                    return;
                }
                StepOutcome::Cancelled => {
                    self.mark_cancelled(run);
                    return;
                }
            }
        }

        run.ctx.status = ExecutionStatus::Completed;
    }

    /// Run one step and resolve a failure against its error handlers.
    async fn run_step(&self, run: &mut Run, step: &StepConfig, backoff: &RetryBackoff) -> StepOutcome {
        let evaluator =
            DecisionEvaluator::new(Arc::clone(&self.expressions), self.config.evaluation_failure);
        let mut retry_count = 0;
        run.attempt = retry_count;

        let mut record = StepExecutor::new(&run.client, &evaluator)
            .execute(step, &mut run.ctx, retry_count)
            .await;
        if let Some(outcome) = settled(&record) {
            run.steps.push(record);
            return outcome;
        }

        for handler in &step.error_handlers {
            match &handler.action {
                ErrorAction::Retry => {
                    for _ in 0..handler.max_retries {
                        let delay = backoff.delay_for(retry_count + 1);
                        if !wait(&run.cancel, delay).await {
                            record.error_kind = Some(ErrorKind::Cancelled);
                            record.error = Some(format!(
                                "Execution cancelled while waiting to retry (last error: {})",
                                record.error.as_deref().unwrap_or("unknown")
                            ));
                            run.steps.push(record);
                            return StepOutcome::Cancelled;
                        }

                        record.status = StepStatus::Retry;
                        run.steps.push(record);
                        retry_count += 1;
                        run.attempt = retry_count;
                        run.ctx.audit.info(
                            "step_retry",
                            json!({
                                "step_id": step.id,
                                "retry_count": retry_count,
                                "max_retries": handler.max_retries,
                                "delay_ms": delay.as_millis() as u64,
                            }),
                        );

                        record = StepExecutor::new(&run.client, &evaluator)
                            .execute(step, &mut run.ctx, retry_count)
                            .await;
                        if let Some(outcome) = settled(&record) {
                            run.steps.push(record);
                            return outcome;
                        }
                    }
                }
                ErrorAction::Skip => {
                    run.ctx.audit.warning(
                        "step_skipped",
                        json!({
                            "step_id": step.id,
                            "step_number": step.step_number,
                            "error": record.error,
                        }),
                    );
                    run.steps.push(record);
                    return StepOutcome::Resolved;
                }
                ErrorAction::Escalate => {
                    let event = EscalationEvent {
                        execution_id: run.ctx.execution_id.clone(),
                        workflow_id: run.ctx.workflow_id.clone(),
                        step_id: step.id.clone(),
                        step_number: step.step_number,
                        error: record.error.clone().unwrap_or_default(),
                        retry_count,
                    };
                    run.ctx.audit.warning(
                        "step_escalated",
                        json!({
                            "step_id": step.id,
                            "step_number": step.step_number,
                            "error": event.error,
                        }),
                    );
                    self.escalation.escalate(&event);
                }
                ErrorAction::Abort => {
                    run.ctx.audit.error(
                        "step_aborted",
                        json!({"step_id": step.id, "error": record.error}),
                    );
                    break;
                }
                ErrorAction::Other(action) => {
                    warn!(step = %step.id, action = %action, "Unknown error handler action");
                    run.ctx.audit.warning(
                        "unknown_error_action",
                        json!({"step_id": step.id, "action": action}),
                    );
                    break;
                }
            }
        }

        let err = EngineError::StepFailure {
            step: step.id.clone(),
            message: record.error.clone().unwrap_or_else(|| "step failed".to_string()),
        };
        run.ctx
            .record_error(ErrorRecord::from_error(&err).at_step(step.step_number, step.display_name()));
        run.steps.push(record);
        StepOutcome::Halted
    }

    fn mark_cancelled(&self, run: &mut Run) {
        warn!(execution_id = %run.ctx.execution_id, "Execution cancelled");
        run.ctx.status = ExecutionStatus::Cancelled;
        run.ctx
            .record_error(ErrorRecord::new("Cancelled", "Execution cancelled"));
        account_for_remaining(run, "execution cancelled");
    }

    async fn suspend(&self, mut run: Run) -> ExecutionResult {
        run.ctx.audit.info(
            "workflow_suspended",
            json!({
                "resume_at_step": run.next_step,
                "steps_recorded": run.steps.len(),
            }),
        );
        self.registry.update(&run.ctx).await;

        let result = ExecutionResult::build(&run.ctx, &run.steps, run.client.calls(), run.pending.clone());
        info!(
            execution_id = %run.ctx.execution_id,
            step = ?run.pending.as_ref().map(|p| p.step_id.as_str()),
            "Workflow waiting for approval"
        );

        let execution_id = run.ctx.execution_id.clone();
        self.suspended.store(execution_id, run).await;
        result
    }

    async fn finish(&self, mut run: Run) -> ExecutionResult {
        let (event_type, level) = match run.ctx.status {
            ExecutionStatus::Completed => ("workflow_completed", AuditLevel::Info),
            ExecutionStatus::Cancelled => ("workflow_cancelled", AuditLevel::Warning),
            _ => ("workflow_failed", AuditLevel::Error),
        };
        run.ctx.audit.log(
            event_type,
            json!({
                "status": run.ctx.status,
                "steps_recorded": run.steps.len(),
                "errors": run.ctx.errors.len(),
            }),
            level,
        );
        self.registry.remove(&run.ctx.execution_id).await;

        let Run {
            ctx, client, steps, ..
        } = run;
        let result = ExecutionResult::build(&ctx, &steps, client.into_calls(), None);
        info!(
            execution_id = %result.execution_id,
            status = %result.status,
            steps_completed = result.steps_completed,
            duration_ms = result.total_duration_ms,
            "Workflow finished"
        );
        result
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("catalog", &self.catalog)
            .field("adapters", &self.adapters)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// `None` while the failure is still open to error handling.
fn settled(record: &StepExecution) -> Option<StepOutcome> {
    match record.status {
        StepStatus::Success => Some(StepOutcome::Completed),
        StepStatus::ManualReview => Some(StepOutcome::ManualReview(PendingApproval::for_step(record))),
        _ if record.error_kind == Some(ErrorKind::Cancelled) => Some(StepOutcome::Cancelled),
        _ => None,
    }
}

/// Append a `skipped` record for every step that has none yet.
fn account_for_remaining(run: &mut Run, reason: &str) {
    let definition = Arc::clone(&run.definition);
    for step in definition.steps.iter().skip(run.next_step) {
        if !run.steps.iter().any(|s| s.step_id == step.id) {
            run.steps.push(StepExecution::skipped(step, reason));
        }
    }
    run.next_step = definition.steps.len();
}

/// Sleep for `delay` unless cancelled first. Returns false when cancelled.
async fn wait(cancel: &CancelSignal, delay: Duration) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if delay.is_zero() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => !cancel.is_cancelled(),
        _ = cancel.cancelled() => false,
    }
}

fn forward_cancellation(signal: CancelSignal, handle: CancelHandle) -> CancelForwarder {
    if signal.is_cancelled() {
        handle.cancel();
    }
    CancelForwarder(tokio::spawn(async move {
        signal.cancelled().await;
        handle.cancel();
    }))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
