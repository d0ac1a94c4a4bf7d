//! Workflow definitions.
//!
//! This module provides:
//! - Type definitions for workflow definitions (steps, decision rules, error handlers)
//! - YAML/JSON parsing and validation
//! - The definition catalog consulted at the start of every execution

pub mod catalog;
pub mod types;

pub use catalog::{parse_definition, parse_documents, validate_definition, WorkflowCatalog};
pub use types::{DecisionRule, ErrorAction, ErrorHandler, StepConfig, WorkflowDefinition};
