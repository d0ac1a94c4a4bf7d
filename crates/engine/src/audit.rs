//! Per-execution audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Target used when mirroring audit entries to `tracing`.
pub const AUDIT_TARGET: &str = "agentcard.audit";

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditLevel::Debug => "debug",
            AuditLevel::Info => "info",
            AuditLevel::Warning => "warning",
            AuditLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// One audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub execution_id: String,
    pub event_type: String,
    pub level: AuditLevel,
    pub details: Map<String, Value>,
}

/// Append-only event log owned by a single execution.
///
/// Timestamps never go backwards within one log, even if the wall clock does.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    execution_id: String,
    entries: Vec<AuditLogEntry>,
}

impl AuditLogger {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            entries: Vec::new(),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Append an entry and mirror it to the tracing subscriber.
    pub fn log(&mut self, event_type: &str, details: Value, level: AuditLevel) {
        let now = Utc::now();
        let timestamp = match self.entries.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        let details = match details {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        let entry = AuditLogEntry {
            timestamp,
            execution_id: self.execution_id.clone(),
            event_type: event_type.to_string(),
            level,
            details,
        };
        mirror(&entry);
        self.entries.push(entry);
    }

    pub fn info(&mut self, event_type: &str, details: Value) {
        self.log(event_type, details, AuditLevel::Info);
    }

    pub fn warning(&mut self, event_type: &str, details: Value) {
        self.log(event_type, details, AuditLevel::Warning);
    }

    pub fn error(&mut self, event_type: &str, details: Value) {
        self.log(event_type, details, AuditLevel::Error);
    }

    /// Entries in emission order.
    pub fn entries(&self) -> &[AuditLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<AuditLogEntry> {
        self.entries
    }
}

fn mirror(entry: &AuditLogEntry) {
    let details = Value::Object(entry.details.clone());
    match entry.level {
        AuditLevel::Debug => tracing::debug!(
            target: AUDIT_TARGET,
            execution_id = %entry.execution_id,
            event_type = %entry.event_type,
            details = %details,
            "audit"
        ),
        AuditLevel::Info => tracing::info!(
            target: AUDIT_TARGET,
            execution_id = %entry.execution_id,
            event_type = %entry.event_type,
            details = %details,
            "audit"
        ),
        AuditLevel::Warning => tracing::warn!(
            target: AUDIT_TARGET,
            execution_id = %entry.execution_id,
            event_type = %entry.event_type,
            details = %details,
            "audit"
        ),
        AuditLevel::Error => tracing::error!(
            target: AUDIT_TARGET,
            execution_id = %entry.execution_id,
            event_type = %entry.event_type,
            details = %details,
            "audit"
        ),
    }
}
