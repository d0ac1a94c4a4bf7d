//! Live integration adapters and their registry.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::credentials::CredentialBag;
use crate::error::IntegrationError;
use crate::operation::Operation;

/// Parameters passed to, and payload returned from, an integration call.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Adapter performing real I/O against one external service.
#[async_trait]
pub trait IntegrationAdapter: Send + Sync {
    /// Integration id this adapter serves (e.g. "stripe").
    fn integration_id(&self) -> &str;

    /// Perform the operation.
    async fn call(
        &self,
        operation: Operation,
        params: &Payload,
        credentials: &CredentialBag,
    ) -> Result<Payload, IntegrationError>;
}

/// Registry of live adapters keyed by integration id.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn IntegrationAdapter>>,
}

impl AdapterRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for the same id.
    pub fn register<A: IntegrationAdapter + 'static>(&mut self, adapter: A) {
        let id = adapter.integration_id().to_string();
        self.adapters.insert(id, Arc::new(adapter));
    }

    /// Get an adapter by integration id.
    pub fn get(&self, integration_id: &str) -> Option<Arc<dyn IntegrationAdapter>> {
        self.adapters.get(integration_id).cloned()
    }

    pub fn has(&self, integration_id: &str) -> bool {
        self.adapters.contains_key(integration_id)
    }

    /// List registered integration ids.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.adapters.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.list())
            .finish()
    }
}
