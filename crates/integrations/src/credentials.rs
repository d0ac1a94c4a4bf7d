//! Per-integration credentials.
//!
//! Credentials arrive with each execution as a map from integration id to an
//! opaque bag of secrets. None of these types implement `Serialize`, and their
//! `Debug` output is redacted, so secrets cannot leak into logs or results.

use std::collections::HashMap;

use serde::Deserialize;

const REDACTED: &str = "[REDACTED]";

/// A single secret value.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "serde_json::Value")]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret for use by a live adapter.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<serde_json::Value> for Secret {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self(s),
            other => Self(other.to_string()),
        }
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Secrets belonging to one integration.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct CredentialBag {
    secrets: HashMap<String, Secret>,
}

impl CredentialBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a secret.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.secrets.insert(key.into(), Secret::new(value));
    }

    /// Look up a secret by key.
    pub fn secret(&self, key: &str) -> Option<&str> {
        self.secrets.get(key).map(Secret::expose)
    }

    /// Names of the secrets held (values are never listed).
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.secrets.keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl std::fmt::Debug for CredentialBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.keys().into_iter().map(|k| (k, REDACTED)))
            .finish()
    }
}

/// Credentials for every integration used by one execution.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credentials {
    integrations: HashMap<String, CredentialBag>,
}

impl Credentials {
    /// No credentials: every call takes the simulated path.
    pub fn none() -> Self {
        Self::default()
    }

    /// Builder-style registration of an integration's credential bag.
    pub fn with(mut self, integration_id: impl Into<String>, bag: CredentialBag) -> Self {
        self.insert(integration_id, bag);
        self
    }

    /// Register credentials for an integration.
    pub fn insert(&mut self, integration_id: impl Into<String>, bag: CredentialBag) {
        self.integrations.insert(integration_id.into(), bag);
    }

    /// Credentials for an integration, if registered.
    pub fn get(&self, integration_id: &str) -> Option<&CredentialBag> {
        self.integrations.get(integration_id)
    }

    /// Returns true if credentials are registered for the integration.
    pub fn has(&self, integration_id: &str) -> bool {
        self.integrations.contains_key(integration_id)
    }

    /// Parse the caller's JSON credential map.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.integrations.keys().collect();
        ids.sort_unstable();
        f.debug_struct("Credentials").field("integrations", &ids).finish()
    }
}
