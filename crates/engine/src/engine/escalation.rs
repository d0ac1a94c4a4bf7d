//! Notification seam for `escalate` error handlers.

use serde::{Deserialize, Serialize};

/// A step failure handed to an escalation hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub execution_id: String,
    pub workflow_id: String,
    pub step_id: String,
    pub step_number: u32,
    pub error: String,
    pub retry_count: u32,
}

/// Receives escalations. Must not block; hand off to a queue if delivery is slow.
pub trait EscalationHook: Send + Sync {
    fn escalate(&self, event: &EscalationEvent);
}

/// Default hook: logs the escalation.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEscalationHook;

impl EscalationHook for LoggingEscalationHook {
    fn escalate(&self, event: &EscalationEvent) {
        tracing::warn!(
            execution_id = %event.execution_id,
            workflow_id = %event.workflow_id,
            step = %event.step_id,
            error = %event.error,
            "Step escalated"
        );
    }
}
