//! Workflow execution engine.
//!
//! - **Orchestrator**: `WorkflowEngine`, runs executions step by step
//! - **Registry**: live execution snapshots and paused runs
//! - **Escalation**: notification seam for `escalate` error handlers

pub mod escalation;
pub mod orchestrator;
pub mod registry;


pub use escalation::{EscalationEvent, EscalationHook, LoggingEscalationHook};
pub use orchestrator::{ApprovalDecision, WorkflowEngine};
pub use registry::{ExecutionRegistry, ExecutionSnapshot, SuspendedExecutions};
