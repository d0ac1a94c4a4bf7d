//! Agent Card workflow engine.
//!
//! Executes declarative workflow definitions ("agent cards"): an ordered
//! list of steps, each calling integrations and evaluating decision rules
//! over the accumulated variables. Every execution produces a complete,
//! auditable [`ExecutionResult`].
//!
//! ```no_run
//! use agentcard_engine::{EngineConfig, WorkflowEngine};
//! use agentcard_integrations::Credentials;
//! use serde_json::Map;
//!
//! # async fn run() -> agentcard_engine::EngineResult<()> {
//! let engine = WorkflowEngine::new(EngineConfig::default());
//! engine
//!     .catalog()
//!     .register_str(&std::fs::read_to_string("definitions/9.2.1.1.yaml")?)
//!     .await?;
//!
//! let result = engine.execute("9.2.1.1", Map::new(), Credentials::none()).await;
//! println!("{}", result.to_json_pretty()?);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod logging;
pub mod result;
pub mod step;

pub use audit::{AuditLevel, AuditLogEntry, AuditLogger};
pub use config::{ApprovalMode, EngineConfig, EvaluationFailurePolicy, RetryBackoff};
pub use context::{ErrorRecord, ExecutionContext, ExecutionStatus};
pub use definition::{
    DecisionRule, ErrorAction, ErrorHandler, StepConfig, WorkflowCatalog, WorkflowDefinition,
};
pub use engine::{
    ApprovalDecision, EscalationEvent, EscalationHook, ExecutionSnapshot, LoggingEscalationHook,
    WorkflowEngine,
};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use evaluator::{DecisionEvaluator, DecisionResult, EvaluationError, ExpressionCache};
pub use logging::{init_tracing, LogFormat};
pub use result::{ExecutionResult, PendingApproval, StepSummary};
pub use step::{StepExecution, StepExecutor, StepStatus};
