//! Bookkeeping for live and paused executions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentcard_integrations::CancelHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::context::{ExecutionContext, ExecutionStatus};

/// Point-in-time view of an execution, for status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub current_step: usize,
    pub total_steps: usize,
    pub started_at: DateTime<Utc>,
}

impl From<&ExecutionContext> for ExecutionSnapshot {
    fn from(ctx: &ExecutionContext) -> Self {
        Self {
            execution_id: ctx.execution_id.clone(),
            workflow_id: ctx.workflow_id.clone(),
            status: ctx.status,
            current_step: ctx.current_step,
            total_steps: ctx.total_steps,
            started_at: ctx.started_at,
        }
    }
}

struct Entry {
    snapshot: ExecutionSnapshot,
    cancel: CancelHandle,
}

/// Executions that have started and not yet reached a terminal state.
#[derive(Clone, Default)]
pub struct ExecutionRegistry {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, ctx: &ExecutionContext, cancel: CancelHandle) {
        let snapshot = ExecutionSnapshot::from(ctx);
        self.entries
            .write()
            .await
            .insert(snapshot.execution_id.clone(), Entry { snapshot, cancel });
    }

    /// Refresh the snapshot from the context.
    pub async fn update(&self, ctx: &ExecutionContext) {
        if let Some(entry) = self.entries.write().await.get_mut(&ctx.execution_id) {
            entry.snapshot = ExecutionSnapshot::from(ctx);
        }
    }

    pub async fn remove(&self, execution_id: &str) {
        self.entries.write().await.remove(execution_id);
    }

    pub async fn get(&self, execution_id: &str) -> Option<ExecutionSnapshot> {
        self.entries
            .read()
            .await
            .get(execution_id)
            .map(|e| e.snapshot.clone())
    }

    /// All live executions, oldest first.
    pub async fn list(&self) -> Vec<ExecutionSnapshot> {
        let mut snapshots: Vec<ExecutionSnapshot> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.snapshot.clone())
            .collect();
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        snapshots
    }

    /// Request cancellation. Returns false for unknown ids.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        match self.entries.read().await.get(execution_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl std::fmt::Debug for ExecutionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRegistry").finish_non_exhaustive()
    }
}

struct Parked<T> {
    run: T,
    since: Instant,
}

/// Paused runs keyed by execution id.
///
/// A run is removed when it is resumed, so two concurrent `resume` calls for
/// the same id cannot both continue it. Runs stay here until taken; callers
/// bound their lifetime with [`take_expired`](Self::take_expired).
pub struct SuspendedExecutions<T> {
    runs: Arc<RwLock<HashMap<String, Parked<T>>>>,
}

impl<T> SuspendedExecutions<T> {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn store(&self, execution_id: impl Into<String>, run: T) {
        let parked = Parked {
            run,
            since: Instant::now(),
        };
        self.runs.write().await.insert(execution_id.into(), parked);
    }

    pub async fn take(&self, execution_id: &str) -> Option<T> {
        self.runs.write().await.remove(execution_id).map(|p| p.run)
    }

    /// Remove every run paused for at least `max_age`, sorted by id.
    pub async fn take_expired(&self, max_age: Duration) -> Vec<(String, T)> {
        let mut runs = self.runs.write().await;
        let mut expired: Vec<String> = runs
            .iter()
            .filter(|(_, parked)| parked.since.elapsed() >= max_age)
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();

        expired
            .into_iter()
            .filter_map(|id| runs.remove(&id).map(|p| (id, p.run)))
            .collect()
    }

    pub async fn contains(&self, execution_id: &str) -> bool {
        self.runs.read().await.contains_key(execution_id)
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl<T> Clone for SuspendedExecutions<T> {
    fn clone(&self) -> Self {
        Self {
            runs: Arc::clone(&self.runs),
        }
    }
}

impl<T> Default for SuspendedExecutions<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::WorkflowDefinition;
    use agentcard_integrations::Credentials;
    use serde_json::{json, Map};

    fn context() -> ExecutionContext {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "process_code": "1.1",
            "steps": [{"id": "a", "step_number": 1}]
        }))
        .unwrap();
        ExecutionContext::new(&def, Map::new(), Credentials::none())
    }

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let registry = ExecutionRegistry::new();
        let mut ctx = context();
        let handle = CancelHandle::new();

        registry.insert(&ctx, handle.clone()).await;
        assert_eq!(registry.len().await, 1);

        ctx.status = ExecutionStatus::Running;
        registry.update(&ctx).await;
        let snapshot = registry.get(&ctx.execution_id).await.unwrap();
        assert_eq!(snapshot.status, ExecutionStatus::Running);

        assert!(registry.cancel(&ctx.execution_id).await);
        assert!(handle.is_cancelled());
        assert!(!registry.cancel("nope").await);

        registry.remove(&ctx.execution_id).await;
        assert!(registry.get(&ctx.execution_id).await.is_none());
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_inserts() {
        let registry = ExecutionRegistry::new();
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let ctx = context();
                registry.insert(&ctx, CancelHandle::new()).await;
                ctx.execution_id
            }));
        }
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        assert_eq!(registry.len().await, 16);
        for id in &ids {
            registry.remove(id).await;
        }
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_suspended_take_once() {
        let suspended: SuspendedExecutions<u32> = SuspendedExecutions::new();
        suspended.store("exec-1", 7).await;
        assert!(suspended.contains("exec-1").await);
        assert_eq!(suspended.ids().await, vec!["exec-1".to_string()]);
        assert_eq!(suspended.take("exec-1").await, Some(7));
        assert_eq!(suspended.take("exec-1").await, None);
    }

    #[tokio::test]
    async fn test_take_expired() {
        let suspended: SuspendedExecutions<&str> = SuspendedExecutions::new();
        suspended.store("exec-b", "second").await;
        suspended.store("exec-a", "first").await;

        assert!(suspended.take_expired(Duration::from_secs(3600)).await.is_empty());
        assert_eq!(suspended.ids().await.len(), 2);

        let expired = suspended.take_expired(Duration::ZERO).await;
        assert_eq!(
            expired,
            vec![
                ("exec-a".to_string(), "first"),
                ("exec-b".to_string(), "second")
            ]
        );
        assert!(suspended.ids().await.is_empty());
    }
}
