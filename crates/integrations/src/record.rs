//! Integration call records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operation::Operation;

/// How a call was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    /// No credentials registered; a canned response was produced.
    Simulated,
    /// Dispatched to a live adapter.
    Live,
}

impl std::fmt::Display for CallMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallMode::Simulated => write!(f, "simulated"),
            CallMode::Live => write!(f, "live"),
        }
    }
}

/// One attempted integration call. Recorded exactly once per attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationCallRecord {
    pub integration_id: String,
    pub operation: Operation,
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub mode: CallMode,
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Map<String, serde_json::Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl IntegrationCallRecord {
    /// Record a successful call.
    pub fn succeeded(
        integration_id: &str,
        operation: Operation,
        parameters: serde_json::Map<String, serde_json::Value>,
        mode: CallMode,
        result: serde_json::Map<String, serde_json::Value>,
        duration_ms: u64,
    ) -> Self {
        Self {
            integration_id: integration_id.to_string(),
            operation,
            parameters,
            mode,
            success: true,
            result: Some(result),
            error: None,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    /// Record a failed call.
    pub fn failed(
        integration_id: &str,
        operation: Operation,
        parameters: serde_json::Map<String, serde_json::Value>,
        mode: CallMode,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            integration_id: integration_id.to_string(),
            operation,
            parameters,
            mode,
            success: false,
            result: None,
            error: Some(error.into()),
            duration_ms,
            timestamp: Utc::now(),
        }
    }
}
