//! Per-execution integration client.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::FutureExt;

use crate::adapter::{AdapterRegistry, Payload};
use crate::cancel::CancelSignal;
use crate::credentials::Credentials;
use crate::error::IntegrationError;
use crate::operation::Operation;
use crate::record::{CallMode, IntegrationCallRecord};
use crate::simulated::simulated_response;

/// Dispatches integration calls for a single execution and records every
/// attempt, successful or not, before the result is handed back.
///
/// Integrations without registered credentials take the simulated path;
/// the rest go to the live adapter registered for their id.
pub struct IntegrationClient {
    credentials: Credentials,
    adapters: Arc<AdapterRegistry>,
    call_log: Mutex<Vec<IntegrationCallRecord>>,
    timeout: Option<Duration>,
    cancel: CancelSignal,
}

impl IntegrationClient {
    /// Create a client for one execution.
    pub fn new(credentials: Credentials, adapters: Arc<AdapterRegistry>) -> Self {
        Self {
            credentials,
            adapters,
            call_log: Mutex::new(Vec::new()),
            timeout: None,
            cancel: CancelSignal::never(),
        }
    }

    /// Bound every live call by `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Observe cancellation of the owning execution.
    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Mode a call to `integration_id` would use.
    pub fn mode_for(&self, integration_id: &str) -> CallMode {
        if self.credentials.has(integration_id) {
            CallMode::Live
        } else {
            CallMode::Simulated
        }
    }

    /// Call an integration.
    ///
    /// Once cancellation has been requested no call is issued and
    /// [`IntegrationError::Cancelled`] is returned without a record.
    pub async fn call(
        &self,
        integration_id: &str,
        operation: Operation,
        params: Payload,
    ) -> Result<Payload, IntegrationError> {
        if self.cancel.is_cancelled() {
            return Err(IntegrationError::Cancelled);
        }

        let mode = self.mode_for(integration_id);
        let start = Instant::now();

        let result = match mode {
            CallMode::Simulated => Ok(simulated_response(integration_id, operation, &params)),
            CallMode::Live => {
                let outcome = AssertUnwindSafe(self.call_live(integration_id, operation, &params))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(result) => result,
                    Err(payload) => {
                        // Record the attempt, then let the panic reach the engine.
                        let error = format!("Adapter panicked: {}", panic_message(payload.as_ref()));
                        tracing::error!(
                            integration = %integration_id,
                            operation = %operation,
                            error = %error,
                            "Integration adapter panicked"
                        );
                        self.log().push(IntegrationCallRecord::failed(
                            integration_id,
                            operation,
                            params,
                            mode,
                            error,
                            start.elapsed().as_millis() as u64,
                        ));
                        std::panic::resume_unwind(payload);
                    }
                }
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let record = match &result {
            Ok(payload) => IntegrationCallRecord::succeeded(
                integration_id,
                operation,
                params,
                mode,
                payload.clone(),
                duration_ms,
            ),
            Err(e) => {
                tracing::warn!(
                    integration = %integration_id,
                    operation = %operation,
                    mode = %mode,
                    error = %e,
                    "Integration call failed"
                );
                IntegrationCallRecord::failed(
                    integration_id,
                    operation,
                    params,
                    mode,
                    e.to_string(),
                    duration_ms,
                )
            }
        };

        tracing::debug!(
            integration = %integration_id,
            operation = %operation,
            mode = %mode,
            success = record.success,
            duration_ms,
            "Integration call recorded"
        );
        self.log().push(record);

        result
    }

    async fn call_live(
        &self,
        integration_id: &str,
        operation: Operation,
        params: &Payload,
    ) -> Result<Payload, IntegrationError> {
        let adapter = self
            .adapters
            .get(integration_id)
            .ok_or_else(|| IntegrationError::AdapterNotFound(integration_id.to_string()))?;
        let bag = self
            .credentials
            .get(integration_id)
            .ok_or_else(|| IntegrationError::Credentials(integration_id.to_string()))?;

        let call = async {
            match self.timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, adapter.call(operation, params, bag)).await {
                        Ok(res) => res,
                        Err(_) => Err(IntegrationError::Timeout(limit.as_millis() as u64)),
                    }
                }
                None => adapter.call(operation, params, bag).await,
            }
        };

        tokio::select! {
            res = call => res,
            _ = self.cancel.cancelled() => Err(IntegrationError::Cancelled),
        }
    }

    /// Snapshot of every call recorded so far, in call order.
    pub fn calls(&self) -> Vec<IntegrationCallRecord> {
        self.log().clone()
    }

    /// Calls recorded after the first `index` calls.
    pub fn calls_since(&self, index: usize) -> Vec<IntegrationCallRecord> {
        self.log().iter().skip(index).cloned().collect()
    }

    pub fn call_count(&self) -> usize {
        self.log().len()
    }

    /// Consume the client, returning its call log.
    pub fn into_calls(self) -> Vec<IntegrationCallRecord> {
        self.call_log
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log(&self) -> MutexGuard<'_, Vec<IntegrationCallRecord>> {
        self.call_log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
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

impl std::fmt::Debug for IntegrationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationClient")
            .field("credentials", &self.credentials)
            .field("adapters", &self.adapters)
            .field("calls", &self.call_count())
            .field("timeout", &self.timeout)
            .finish()
    }
}
