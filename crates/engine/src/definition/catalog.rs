//! Workflow definition parsing, validation and lookup.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

use super::types::WorkflowDefinition;

const DEFINITION_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Parse a single workflow definition from YAML or JSON text.
pub fn parse_definition(content: &str) -> EngineResult<WorkflowDefinition> {
    let mut definition: WorkflowDefinition =
        serde_yaml::from_str(content).map_err(|e| EngineError::DefinitionParse(e.to_string()))?;

    normalize(&mut definition);
    validate_definition(&definition)?;
    Ok(definition)
}

/// Parse a document holding either one definition or a map of
/// process code to definition.
pub fn parse_documents(content: &str) -> EngineResult<Vec<WorkflowDefinition>> {
    let single_err = match parse_definition(content) {
        Ok(definition) => return Ok(vec![definition]),
        Err(e) => e,
    };

    let keyed: BTreeMap<String, WorkflowDefinition> = match serde_yaml::from_str(content) {
        Ok(keyed) => keyed,
        Err(_) => return Err(single_err),
    };

    keyed
        .into_iter()
        .map(|(code, mut definition)| {
            if definition.process_code.is_empty() {
                definition.process_code = code;
            }
            normalize(&mut definition);
            validate_definition(&definition)?;
            Ok(definition)
        })
        .collect()
}

/// Order steps by step number (stable for equal numbers).
fn normalize(definition: &mut WorkflowDefinition) {
    definition.steps.sort_by_key(|s| s.step_number);
}

/// Validate a parsed definition.
pub fn validate_definition(definition: &WorkflowDefinition) -> EngineResult<()> {
    if definition.process_code.trim().is_empty() {
        return Err(EngineError::InvalidDefinition(
            "Workflow definition must have a process code".to_string(),
        ));
    }

    if definition.steps.is_empty() {
        return Err(EngineError::InvalidDefinition(format!(
            "Workflow '{}' has no steps",
            definition.process_code
        )));
    }

    let mut seen_ids = HashSet::new();
    let mut seen_numbers = HashSet::new();
    for step in &definition.steps {
        if step.id.trim().is_empty() {
            return Err(EngineError::InvalidDefinition(format!(
                "Workflow '{}': step {} has an empty id",
                definition.process_code, step.step_number
            )));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(EngineError::InvalidDefinition(format!(
                "Workflow '{}': duplicate step id '{}'",
                definition.process_code, step.id
            )));
        }
        if !seen_numbers.insert(step.step_number) {
            return Err(EngineError::InvalidDefinition(format!(
                "Workflow '{}': duplicate step number {}",
                definition.process_code, step.step_number
            )));
        }
        for rule in &step.decision_rules {
            if rule.condition.trim().is_empty() {
                return Err(EngineError::InvalidDefinition(format!(
                    "Workflow '{}': rule '{}' in step '{}' has an empty condition",
                    definition.process_code, rule.id, step.id
                )));
            }
        }
    }

    Ok(())
}

/// Read-only cache of workflow definitions keyed by process code.
///
/// Lazily populated from `definitions_dir` on a miss; population happens
/// under the write lock, so concurrent executions never see partial entries.
#[derive(Clone, Default)]
pub struct WorkflowCatalog {
    definitions: Arc<RwLock<HashMap<String, Arc<WorkflowDefinition>>>>,
    definitions_dir: Option<PathBuf>,
}

impl WorkflowCatalog {
    /// Create an empty in-memory catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog that falls back to `<dir>/<process_code>.{yaml,yml,json}`.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            definitions: Arc::default(),
            definitions_dir: Some(dir.into()),
        }
    }

    /// Register a definition, replacing any existing one with the same code.
    pub async fn register(&self, definition: WorkflowDefinition) -> EngineResult<()> {
        validate_definition(&definition)?;
        let code = definition.process_code.clone();
        info!(process_code = %code, steps = definition.steps.len(), "Registered workflow definition");
        self.definitions
            .write()
            .await
            .insert(code, Arc::new(definition));
        Ok(())
    }

    /// Parse and register every definition found in `content`.
    pub async fn register_str(&self, content: &str) -> EngineResult<Vec<String>> {
        let mut codes = Vec::new();
        for definition in parse_documents(content)? {
            codes.push(definition.process_code.clone());
            self.register(definition).await?;
        }
        Ok(codes)
    }

    /// Load every definition file in `dir`. Returns the number registered.
    pub async fn load_dir(&self, dir: impl AsRef<Path>) -> EngineResult<usize> {
        let mut entries = tokio::fs::read_dir(dir.as_ref()).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if has_definition_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut count = 0;
        for path in paths {
            let content = tokio::fs::read_to_string(&path).await?;
            let codes = self.register_str(&content).await.map_err(|e| {
                warn!(path = %path.display(), error = %e, "Invalid workflow definition file");
                e
            })?;
            count += codes.len();
        }

        info!(dir = %dir.as_ref().display(), count, "Loaded workflow definitions");
        Ok(count)
    }

    /// Look up a definition by process code.
    pub async fn get(&self, process_code: &str) -> EngineResult<Arc<WorkflowDefinition>> {
        if let Some(definition) = self.definitions.read().await.get(process_code) {
            return Ok(Arc::clone(definition));
        }

        let Some(dir) = &self.definitions_dir else {
            return Err(not_found(process_code));
        };

        if !is_safe_code(process_code) {
            return Err(EngineError::WorkflowLoad(format!(
                "Invalid process code '{}'",
                process_code
            )));
        }

        let mut definitions = self.definitions.write().await;
        if let Some(definition) = definitions.get(process_code) {
            return Ok(Arc::clone(definition));
        }

        for ext in DEFINITION_EXTENSIONS {
            let path = dir.join(format!("{}.{}", process_code, ext));
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(EngineError::WorkflowLoad(format!(
                        "Failed to read {}: {}",
                        path.display(),
                        e
                    )))
                }
            };

            debug!(path = %path.display(), "Loading workflow definition on demand");
            let mut definition = parse_definition(&content)
                .map_err(|e| EngineError::WorkflowLoad(format!("{}: {}", path.display(), e)))?;
            if definition.process_code != process_code {
                warn!(
                    path = %path.display(),
                    declared = %definition.process_code,
                    "Definition file declares a different process code; using file name"
                );
                definition.process_code = process_code.to_string();
            }

            let definition = Arc::new(definition);
            definitions.insert(process_code.to_string(), Arc::clone(&definition));
            return Ok(definition);
        }

        Err(not_found(process_code))
    }

    /// Process codes currently cached.
    pub async fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.definitions.read().await.keys().cloned().collect();
        codes.sort();
        codes
    }
}

impl std::fmt::Debug for WorkflowCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCatalog")
            .field("definitions_dir", &self.definitions_dir)
            .finish()
    }
}

fn not_found(process_code: &str) -> EngineError {
    EngineError::WorkflowLoad(format!(
        "No workflow definition found for process code '{}'",
        process_code
    ))
}

fn has_definition_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| DEFINITION_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Process codes become file names; reject anything that could escape the directory.
fn is_safe_code(process_code: &str) -> bool {
    !process_code.is_empty()
        && !process_code.contains("..")
        && !process_code.contains(['/', '\\'])
}
