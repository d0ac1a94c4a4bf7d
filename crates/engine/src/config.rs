//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What a decision rule yields when its condition cannot be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationFailurePolicy {
    /// Treat the rule as passed (`result = true`, action-if-true).
    /// Matches how existing rule sets have always behaved.
    #[default]
    FailOpen,
    /// Treat the rule as not passed (`result = false`, action-if-false).
    FailClosed,
    /// Fail the step; its error handlers decide what happens next.
    FailStep,
}

/// How a `manual_review` step is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Suspend the execution until `resume` is called with a decision.
    #[default]
    Suspend,
    /// Log the pending approval and keep going.
    Continue,
}

/// Engine configuration loaded from environment variables.
///
/// Environment variables are prefixed with `AGENTCARD_`:
/// - `AGENTCARD_DEFINITIONS_DIR`: directory of workflow definition files (optional)
/// - `AGENTCARD_CALL_TIMEOUT_MS`: per integration call timeout, `0` disables (default: 30000)
/// - `AGENTCARD_RETRY_INITIAL_DELAY_MS`: first retry delay (default: 500)
/// - `AGENTCARD_RETRY_MAX_DELAY_MS`: retry delay cap (default: 10000)
/// - `AGENTCARD_RETRY_BACKOFF_MULTIPLIER`: exponential factor (default: 2.0)
/// - `AGENTCARD_EVALUATION_FAILURE`: `fail_open`, `fail_closed` or `fail_step` (default: fail_open)
/// - `AGENTCARD_APPROVAL_MODE`: `suspend` or `continue` (default: suspend)
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub definitions_dir: Option<PathBuf>,

    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: Option<u64>,

    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,

    #[serde(default)]
    pub evaluation_failure: EvaluationFailurePolicy,

    #[serde(default)]
    pub approval_mode: ApprovalMode,
}

fn default_call_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_retry_initial_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    10_000
}

fn default_retry_backoff_multiplier() -> f64 {
    2.0
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `AGENTCARD_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("AGENTCARD_").from_env::<EngineConfig>()
    }

    /// Load a `.env` file if present, then read the environment.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Per-call timeout, `None` when disabled.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn retry_backoff(&self) -> RetryBackoff {
        RetryBackoff {
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            multiplier: self.retry_backoff_multiplier,
        }
    }

    /// Configuration without retry delays or call timeouts, for dry runs.
    pub fn immediate() -> Self {
        Self {
            call_timeout_ms: None,
            retry_initial_delay_ms: 0,
            retry_max_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn with_definitions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.definitions_dir = Some(dir.into());
        self
    }

    pub fn with_evaluation_failure(mut self, policy: EvaluationFailurePolicy) -> Self {
        self.evaluation_failure = policy;
        self
    }

    pub fn with_approval_mode(mut self, mode: ApprovalMode) -> Self {
        self.approval_mode = mode;
        self
    }

    pub fn with_call_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.call_timeout_ms = timeout_ms;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            definitions_dir: None,
            call_timeout_ms: default_call_timeout_ms(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_backoff_multiplier: default_retry_backoff_multiplier(),
            evaluation_failure: EvaluationFailurePolicy::default(),
            approval_mode: ApprovalMode::default(),
        }
    }
}

/// Exponential delay between step retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryBackoff {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 || self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1.0).powi(retry as i32 - 1);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.definitions_dir.is_none());
        assert_eq!(config.call_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.evaluation_failure, EvaluationFailurePolicy::FailOpen);
        assert_eq!(config.approval_mode, ApprovalMode::Suspend);
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = EngineConfig::default().with_call_timeout_ms(Some(0));
        assert_eq!(config.call_timeout(), None);
    }

    #[test]
    fn test_retry_backoff() {
        let backoff = EngineConfig::default().retry_backoff();
        assert_eq!(backoff.delay_for(0), Duration::ZERO);
        assert_eq!(backoff.delay_for(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for(10), Duration::from_millis(10_000));
    }

    #[test]
    fn test_immediate_has_no_delays() {
        let backoff = EngineConfig::immediate().retry_backoff();
        assert_eq!(backoff.delay_for(3), Duration::ZERO);
        assert_eq!(EngineConfig::immediate().call_timeout(), None);
    }

    #[test]
    fn test_policy_deserialization() {
        let policy: EvaluationFailurePolicy = serde_json::from_str("\"fail_step\"").unwrap();
        assert_eq!(policy, EvaluationFailurePolicy::FailStep);
        let mode: ApprovalMode = serde_json::from_str("\"continue\"").unwrap();
        assert_eq!(mode, ApprovalMode::Continue);
    }
}
