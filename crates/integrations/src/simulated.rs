//! Canned responses for the simulated (dry-run) call path.
//!
//! Every key is prefixed with the sanitized integration id so that outputs of
//! different integrations merged into one variable map never collide.
//! Responses are deterministic for a given (integration, operation, params).

use serde_json::json;

use crate::adapter::Payload;
use crate::operation::Operation;

/// Broad family an integration id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationFamily {
    Payments,
    Erp,
    Document,
    Messaging,
    Crm,
    Banking,
    Generic,
}

impl IntegrationFamily {
    /// Classify an integration id by well-known vendor and category names.
    pub fn classify(integration_id: &str) -> Self {
        let id = integration_id.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| id.contains(n));

        if has(&["stripe", "paypal", "adyen", "square", "payment"]) {
            IntegrationFamily::Payments
        } else if has(&["slack", "teams", "email", "sendgrid", "twilio", "smtp", "whatsapp"]) {
            IntegrationFamily::Messaging
        } else if has(&["sap", "oracle", "netsuite", "quickbooks", "erp", "workday"]) {
            IntegrationFamily::Erp
        } else if has(&["ocr", "textract", "docusign", "document"]) {
            IntegrationFamily::Document
        } else if has(&["salesforce", "hubspot", "crm", "zendesk"]) {
            IntegrationFamily::Crm
        } else if has(&["plaid", "bank"]) {
            IntegrationFamily::Banking
        } else {
            IntegrationFamily::Generic
        }
    }
}

/// Lowercase the id and replace anything outside `[a-z0-9_]` with `_`.
pub fn key_prefix(integration_id: &str) -> String {
    integration_id
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Produce the canned response for a simulated call.
pub fn simulated_response(integration_id: &str, operation: Operation, params: &Payload) -> Payload {
    let prefix = key_prefix(integration_id);
    let reference = format!("sim-{}-{}", prefix, operation.as_str());
    let mut out = Payload::new();
    let mut put = |key: &str, value: serde_json::Value| {
        out.insert(format!("{}_{}", prefix, key), value);
    };

    put("status", json!("completed"));
    put("operation", json!(operation.as_str()));
    put("reference", json!(reference));

    match IntegrationFamily::classify(integration_id) {
        IntegrationFamily::Payments => {
            let amount = params.get("amount").cloned().unwrap_or(json!(0));
            put("payment_status", json!("succeeded"));
            put("amount_processed", amount);
            put("currency", json!("USD"));
        }
        IntegrationFamily::Erp => {
            put("sync_status", json!("synced"));
            put("records_processed", json!(params.len()));
        }
        IntegrationFamily::Document => {
            put("document_status", json!("extracted"));
            put("confidence", json!(0.97));
            put(
                "extracted_fields",
                json!(["vendor", "invoice_number", "amount", "due_date"]),
            );
        }
        IntegrationFamily::Messaging => {
            put("delivered", json!(true));
            put("message_id", json!(format!("msg-{}", reference)));
        }
        IntegrationFamily::Crm => {
            put("record_id", json!(format!("rec-{}", reference)));
            put("account_status", json!("active"));
        }
        IntegrationFamily::Banking => {
            put("balance_verified", json!(true));
            put("account_status", json!("open"));
        }
        IntegrationFamily::Generic => {}
    }

    out
}
