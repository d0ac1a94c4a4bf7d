//! Capability to operation mapping.

use serde::{Deserialize, Serialize};

/// Concrete operation invoked on an integration.
///
/// Steps declare capabilities (`payment_processing`, `ocr`, ...); each maps to
/// one operation. Capabilities without a mapping fall back to [`Operation::Execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ProcessPayment,
    ProcessInvoice,
    ExtractDocument,
    SendMessage,
    QueryRecords,
    ValidateData,
    UpdateRecord,
    GenerateReport,
    RequestApproval,
    /// Generic fallback when no capability maps.
    Execute,
}

impl Operation {
    /// Map a single capability to an operation, if a mapping exists.
    pub fn from_capability(capability: &str) -> Option<Self> {
        let op = match capability.trim().to_lowercase().as_str() {
            "payment_processing" => Operation::ProcessPayment,
            "invoice_processing" => Operation::ProcessInvoice,
            "document_processing" | "ocr" => Operation::ExtractDocument,
            "notification" | "messaging" => Operation::SendMessage,
            "data_retrieval" | "lookup" => Operation::QueryRecords,
            "data_validation" => Operation::ValidateData,
            "record_update" => Operation::UpdateRecord,
            "reporting" => Operation::GenerateReport,
            "approval_routing" => Operation::RequestApproval,
            _ => return None,
        };
        Some(op)
    }

    /// Pick the operation for a step: the first capability that maps wins.
    pub fn resolve<S: AsRef<str>>(capabilities: &[S]) -> Self {
        capabilities
            .iter()
            .find_map(|c| Self::from_capability(c.as_ref()))
            .unwrap_or(Operation::Execute)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ProcessPayment => "process_payment",
            Operation::ProcessInvoice => "process_invoice",
            Operation::ExtractDocument => "extract_document",
            Operation::SendMessage => "send_message",
            Operation::QueryRecords => "query_records",
            Operation::ValidateData => "validate_data",
            Operation::UpdateRecord => "update_record",
            Operation::GenerateReport => "generate_report",
            Operation::RequestApproval => "request_approval",
            Operation::Execute => "execute",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
