//! Decision rule evaluation.
//!
//! Conditions are parsed once into an [`Expr`] tree (cached per distinct
//! condition string) and interpreted over a layered, read-only environment:
//! context variables, overlaid by the step output, overlaid by the rule
//! threshold under each of [`THRESHOLD_ALIASES`]. Only identifier lookups,
//! literals, comparisons and `and`/`or`/`not` are expressible.

pub mod lexer;
pub mod parser;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::EvaluationFailurePolicy;
use crate::definition::DecisionRule;

pub use parser::{CmpOp, Expr, Parser};

/// Names under which a rule's threshold is visible to its condition.
pub const THRESHOLD_ALIASES: &[&str] = &[
    "threshold",
    "tolerance_threshold",
    "auto_approve_threshold",
    "approval_threshold",
    "variance_threshold",
    "risk_threshold",
    "confidence_threshold",
    "match_threshold",
];

/// Why a condition could not be evaluated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Syntax error at position {pos}: {message}")]
    Syntax { pos: usize, message: String },

    #[error("Unsupported operator '{operator}' at position {pos}")]
    UnsupportedOperator { operator: String, pos: usize },

    #[error("Undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("Cannot compare {left} {op} {right}")]
    TypeMismatch {
        op: String,
        left: &'static str,
        right: &'static str,
    },
}

/// Outcome of evaluating one decision rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub rule_id: String,
    pub rule_name: String,
    pub condition: String,
    pub threshold: Option<f64>,
    pub result: bool,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared cache of parsed conditions, keyed by condition text.
#[derive(Debug, Default)]
pub struct ExpressionCache {
    entries: RwLock<HashMap<String, Result<Arc<Expr>, EvaluationError>>>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `condition`, reusing a previous parse of the same text.
    pub fn get_or_parse(&self, condition: &str) -> Result<Arc<Expr>, EvaluationError> {
        if let Some(entry) = self
            .entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(condition)
        {
            return entry.clone();
        }

        let parsed = Parser::parse(condition).map(Arc::new);
        self.entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(condition.to_string())
            .or_insert(parsed)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Layered variable lookup; nothing is copied.
pub struct Environment<'a> {
    variables: &'a Map<String, Value>,
    step_output: &'a Map<String, Value>,
    threshold: Option<Value>,
}

impl<'a> Environment<'a> {
    pub fn new(
        variables: &'a Map<String, Value>,
        step_output: &'a Map<String, Value>,
        threshold: Option<f64>,
    ) -> Self {
        Self {
            variables,
            step_output,
            threshold: threshold
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        if let Some(threshold) = &self.threshold {
            if THRESHOLD_ALIASES.contains(&name) {
                return Some(threshold);
            }
        }
        self.step_output
            .get(name)
            .or_else(|| self.variables.get(name))
    }
}

/// Evaluate a parsed expression to a boolean.
pub fn evaluate_expr(expr: &Expr, env: &Environment<'_>) -> Result<bool, EvaluationError> {
    eval(expr, env).map(|v| truthy(&v))
}

/// Parse and evaluate a condition against plain variables.
pub fn evaluate_condition(
    condition: &str,
    variables: &Map<String, Value>,
) -> Result<bool, EvaluationError> {
    let expr = Parser::parse(condition)?;
    let empty = Map::new();
    evaluate_expr(&expr, &Environment::new(variables, &empty, None))
}

fn eval(expr: &Expr, env: &Environment<'_>) -> Result<Value, EvaluationError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Var(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| EvaluationError::UndefinedVariable(name.clone())),
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, env)?))),
        Expr::And(items) => {
            let mut last = Value::Bool(true);
            for item in items {
                last = eval(item, env)?;
                if !truthy(&last) {
                    break;
                }
            }
            Ok(last)
        }
        Expr::Or(items) => {
            let mut last = Value::Bool(false);
            for item in items {
                last = eval(item, env)?;
                if truthy(&last) {
                    break;
                }
            }
            Ok(last)
        }
        Expr::Compare { first, rest } => {
            let mut left = eval(first, env)?;
            for (op, operand) in rest {
                let right = eval(operand, env)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, EvaluationError> {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return Ok(match op {
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
            CmpOp::Ge => l >= r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Lt => l < r,
        });
    }

    if let (Value::String(l), Value::String(r)) = (left, right) {
        return Ok(match op {
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
            CmpOp::Ge => l >= r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Lt => l < r,
        });
    }

    match op {
        CmpOp::Eq => Ok(left == right),
        CmpOp::Ne => Ok(left != right),
        _ => Err(EvaluationError::TypeMismatch {
            op: op.to_string(),
            left: type_name(left),
            right: type_name(right),
        }),
    }
}

/// null, false, 0, "", [] and {} are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Evaluates decision rules under a failure policy.
#[derive(Debug, Clone)]
pub struct DecisionEvaluator {
    cache: Arc<ExpressionCache>,
    policy: EvaluationFailurePolicy,
}

impl DecisionEvaluator {
    pub fn new(cache: Arc<ExpressionCache>, policy: EvaluationFailurePolicy) -> Self {
        Self { cache, policy }
    }

    pub fn policy(&self) -> EvaluationFailurePolicy {
        self.policy
    }

    /// Evaluate `rule` against the context variables and the step's output.
    ///
    /// Under `FailOpen`/`FailClosed` a failed evaluation still yields a
    /// result (with `error` set); under `FailStep` the error is returned.
    pub fn evaluate(
        &self,
        rule: &DecisionRule,
        variables: &Map<String, Value>,
        step_output: &Map<String, Value>,
    ) -> Result<DecisionResult, EvaluationError> {
        let env = Environment::new(variables, step_output, rule.default_threshold);
        let outcome = self
            .cache
            .get_or_parse(&rule.condition)
            .and_then(|expr| evaluate_expr(&expr, &env));

        let (result, error) = match outcome {
            Ok(result) => (result, None),
            Err(e) => match self.policy {
                EvaluationFailurePolicy::FailOpen => (true, Some(e.to_string())),
                EvaluationFailurePolicy::FailClosed => (false, Some(e.to_string())),
                EvaluationFailurePolicy::FailStep => return Err(e),
            },
        };

        let action = if result {
            &rule.action_if_true
        } else {
            &rule.action_if_false
        };

        Ok(DecisionResult {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            condition: rule.condition.clone(),
            threshold: rule.default_threshold,
            result,
            action: action.clone(),
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn rule(condition: &str, threshold: Option<f64>) -> DecisionRule {
        DecisionRule {
            id: "r1".into(),
            name: "Rule".into(),
            condition: condition.into(),
            default_threshold: threshold,
            action_if_true: "route_to_manual_review".into(),
            action_if_false: "auto_approve".into(),
        }
    }

    fn evaluator(policy: EvaluationFailurePolicy) -> DecisionEvaluator {
        DecisionEvaluator::new(Arc::new(ExpressionCache::new()), policy)
    }

    #[test]
    fn test_threshold_comparison() {
        let ev = evaluator(EvaluationFailurePolicy::FailOpen);
        let out = vars(json!({"amount": 1500}));
        let res = ev
            .evaluate(&rule("amount > threshold", Some(1000.0)), &Map::new(), &out)
            .unwrap();
        assert!(res.result);
        assert_eq!(res.action, "route_to_manual_review");
        assert_eq!(res.threshold, Some(1000.0));
        assert!(res.error.is_none());

        let out = vars(json!({"amount": 500}));
        let res = ev
            .evaluate(&rule("amount > threshold", Some(1000.0)), &Map::new(), &out)
            .unwrap();
        assert!(!res.result);
        assert_eq!(res.action, "auto_approve");
    }

    #[test]
    fn test_threshold_aliases() {
        let ev = evaluator(EvaluationFailurePolicy::FailClosed);
        let out = vars(json!({"variance": 0.07, "threshold": 99}));
        for alias in THRESHOLD_ALIASES {
            let res = ev
                .evaluate(&rule(&format!("variance > {}", alias), Some(0.05)), &Map::new(), &out)
                .unwrap();
            assert!(res.result, "alias {} not bound", alias);
        }
    }

    #[test]
    fn test_step_output_overrides_variables() {
        let variables = vars(json!({"status": "pending", "vendor_verified": true}));
        let out = vars(json!({"status": "approved"}));
        let env = Environment::new(&variables, &out, None);
        let expr = Parser::parse("status == 'approved' AND vendor_verified").unwrap();
        assert!(evaluate_expr(&expr, &env).unwrap());
    }

    #[test]
    fn test_legacy_uppercase_operators() {
        let v = vars(json!({"a": 1, "b": 0, "c": "x"}));
        assert!(evaluate_condition("a == 1 AND NOT b OR c == 'y'", &v).unwrap());
        assert!(!evaluate_condition("a==2 OR b", &v).unwrap());
    }

    #[test]
    fn test_chained_comparison_semantics() {
        let v = vars(json!({"score": 0.8}));
        assert!(evaluate_condition("0 < score <= 1", &v).unwrap());
        assert!(!evaluate_condition("0.9 < score <= 1", &v).unwrap());
    }

    #[test]
    fn test_equality_rules() {
        let v = vars(json!({"n": 1, "f": 1.0, "flag": true, "nothing": null}));
        assert!(evaluate_condition("n == f", &v).unwrap());
        assert!(!evaluate_condition("flag == 1", &v).unwrap());
        assert!(evaluate_condition("nothing == null", &v).unwrap());
        assert!(evaluate_condition("nothing != false", &v).unwrap());
    }

    #[test]
    fn test_non_ascii_conditions() {
        let v = vars(json!({"montant_é": 10}));
        assert!(evaluate_condition("montant_é > 5", &v).unwrap());

        let err = evaluate_condition("montant_é ² 2", &v).unwrap_err();
        assert!(matches!(err, EvaluationError::UnsupportedOperator { .. }));
    }

    #[test]
    fn test_type_mismatch() {
        let v = vars(json!({"name": "acme", "amount": 5}));
        let err = evaluate_condition("name > amount", &v).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::TypeMismatch {
                op: ">".into(),
                left: "string",
                right: "number"
            }
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(!truthy(&json!({})));
        assert!(truthy(&json!("no")));
        assert!(truthy(&json!([0])));
    }

    #[test]
    fn test_fail_open_and_fail_closed() {
        let r = rule("missing_field > threshold", Some(10.0));

        let res = evaluator(EvaluationFailurePolicy::FailOpen)
            .evaluate(&r, &Map::new(), &Map::new())
            .unwrap();
        assert!(res.result);
        assert_eq!(res.action, "route_to_manual_review");
        assert_eq!(res.error.as_deref(), Some("Undefined variable 'missing_field'"));

        let res = evaluator(EvaluationFailurePolicy::FailClosed)
            .evaluate(&r, &Map::new(), &Map::new())
            .unwrap();
        assert!(!res.result);
        assert_eq!(res.action, "auto_approve");
        assert!(res.error.is_some());
    }

    #[test]
    fn test_fail_step_returns_error() {
        let err = evaluator(EvaluationFailurePolicy::FailStep)
            .evaluate(&rule("open('/etc/passwd')", None), &Map::new(), &Map::new())
            .unwrap_err();
        assert!(matches!(err, EvaluationError::UnsupportedOperator { .. }));
    }

    #[test]
    fn test_evaluation_is_pure() {
        let ev = evaluator(EvaluationFailurePolicy::FailOpen);
        let variables = vars(json!({"amount": 1200, "risk": "low"}));
        let r = rule("amount >= threshold and risk != 'high'", Some(1200.0));
        let first = ev.evaluate(&r, &variables, &Map::new()).unwrap();
        for _ in 0..5 {
            assert_eq!(ev.evaluate(&r, &variables, &Map::new()).unwrap(), first);
        }
    }

    #[test]
    fn test_cache_parses_once() {
        let cache = ExpressionCache::new();
        let a = cache.get_or_parse("x > 1").unwrap();
        let b = cache.get_or_parse("x > 1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache.get_or_parse("x >").is_err());
        assert_eq!(cache.len(), 2);
    }
}
