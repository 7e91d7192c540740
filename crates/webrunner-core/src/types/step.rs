//! Step type definitions
//!
//! A Step wraps exactly one Action and adds the planning-time contract:
//! expected output shape, failure conditions over the result data, carried
//! context, and execution metadata filled in by the step executor.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::{Action, ActionError, FieldShape};

/// Step lifecycle status. Pending→Running is the only entry point; Success,
/// Failed, and Skipped are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Whether this status ends the step's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// Comparison operator of a failure condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Equals,
    #[serde(alias = "notEquals")]
    NotEquals,
    Contains,
    Exists,
    #[serde(alias = "notExists")]
    NotExists,
    #[serde(alias = ">")]
    GreaterThan,
    #[serde(alias = "<")]
    LessThan,
}

impl ConditionOp {
    fn needs_value(&self) -> bool {
        !matches!(self, ConditionOp::Exists | ConditionOp::NotExists)
    }
}

/// Predicate over a successful result's data; when true, the success is
/// converted into a non-retryable failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureCondition {
    pub field: String,
    pub op: ConditionOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FailureCondition {
    /// Build a condition carrying a comparison value.
    pub fn new(field: impl Into<String>, op: ConditionOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value: Some(value),
        }
    }

    /// Build an existence condition (no comparison value).
    pub fn existence(field: impl Into<String>, op: ConditionOp) -> Self {
        Self {
            field: field.into(),
            op,
            value: None,
        }
    }

    /// A condition is well-formed when value-bearing ops carry a value.
    pub fn is_well_formed(&self) -> bool {
        !self.op.needs_value() || self.value.is_some()
    }

    /// Evaluate against result data. `field` supports dot paths into
    /// nested objects.
    pub fn evaluate(&self, data: &Value) -> bool {
        let found = lookup_field(data, &self.field);
        match self.op {
            ConditionOp::Exists => found.is_some(),
            ConditionOp::NotExists => found.is_none(),
            ConditionOp::Equals => match (found, &self.value) {
                (Some(actual), Some(expected)) => actual == expected,
                _ => false,
            },
            ConditionOp::NotEquals => match (found, &self.value) {
                (Some(actual), Some(expected)) => actual != expected,
                _ => false,
            },
            ConditionOp::Contains => match (found, &self.value) {
                (Some(Value::String(haystack)), Some(Value::String(needle))) => {
                    haystack.contains(needle.as_str())
                }
                (Some(Value::Array(items)), Some(expected)) => items.contains(expected),
                _ => false,
            },
            ConditionOp::GreaterThan => compare_numeric(found, &self.value, |a, b| a > b),
            ConditionOp::LessThan => compare_numeric(found, &self.value, |a, b| a < b),
        }
    }

    /// Human-readable rendering used in failure messages.
    pub fn describe(&self) -> String {
        match &self.value {
            Some(value) => format!("{} {:?} {}", self.field, self.op, value),
            None => format!("{} {:?}", self.field, self.op),
        }
    }
}

fn lookup_field<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn compare_numeric(
    found: Option<&Value>,
    expected: &Option<Value>,
    cmp: impl Fn(f64, f64) -> bool,
) -> bool {
    match (found.and_then(Value::as_f64), expected.as_ref().and_then(Value::as_f64)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// Execution metadata filled in by the step executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,
}

/// Step validation failure.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum StepError {
    #[error("step '{step_id}': {source}")]
    InvalidAction {
        step_id: String,
        #[source]
        source: ActionError,
    },

    #[error("step '{step_id}': failure condition on '{field}' requires a value for op {op:?}")]
    MalformedCondition {
        step_id: String,
        field: String,
        op: ConditionOp,
    },
}

/// One planned invocation of an Action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique identifier for this step.
    pub id: String,
    /// The wrapped action.
    pub action: Action,
    /// Human-readable purpose of the step.
    #[serde(default)]
    pub description: String,
    /// Expected result fields and their shapes; mismatches are warnings,
    /// not failures.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expected_output: BTreeMap<String, FieldShape>,
    /// Predicates converting a successful result into a failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_conditions: Vec<FailureCondition>,
    /// Key-value context carried from prior steps.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Value>,
    /// Lifecycle status.
    pub status: StepStatus,
    /// Result data when the step succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message when the step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Execution metadata.
    #[serde(default)]
    pub metadata: StepMetadata,
}

impl Step {
    /// Create a pending step wrapping the given action.
    pub fn new(action: Action) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            description: String::new(),
            expected_output: BTreeMap::new(),
            failure_conditions: Vec::new(),
            context: BTreeMap::new(),
            status: StepStatus::Pending,
            result: None,
            error: None,
            metadata: StepMetadata::default(),
        }
    }

    /// Override the generated id (deterministic tests, replay).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the expected output shape.
    pub fn with_expected_output(mut self, expected: BTreeMap<String, FieldShape>) -> Self {
        self.expected_output = expected;
        self
    }

    /// Set the failure conditions.
    pub fn with_failure_conditions(mut self, conditions: Vec<FailureCondition>) -> Self {
        self.failure_conditions = conditions;
        self
    }

    /// Set the carried context.
    pub fn with_context(mut self, context: BTreeMap<String, Value>) -> Self {
        self.context = context;
        self
    }

    /// Validate the step before execution: the action schema plus the
    /// well-formedness of every failure condition.
    pub fn validate(&self) -> Result<(), StepError> {
        self.action
            .validate()
            .map_err(|source| StepError::InvalidAction {
                step_id: self.id.clone(),
                source,
            })?;
        for condition in &self.failure_conditions {
            if !condition.is_well_formed() {
                return Err(StepError::MalformedCondition {
                    step_id: self.id.clone(),
                    field: condition.field.clone(),
                    op: condition.op,
                });
            }
        }
        Ok(())
    }

    /// Enter the Running state and stamp the start time.
    pub fn mark_running(&mut self) {
        self.status = StepStatus::Running;
        self.metadata.started_at = Some(Utc::now());
    }

    /// Terminal success: record the result and completion metadata.
    pub fn mark_success(&mut self, data: Value) {
        self.status = StepStatus::Success;
        self.result = Some(data);
        self.error = None;
        self.stamp_completed();
    }

    /// Terminal failure: record the error and completion metadata.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.result = None;
        self.stamp_completed();
    }

    /// Terminal skip.
    pub fn mark_skipped(&mut self) {
        self.status = StepStatus::Skipped;
        self.stamp_completed();
    }

    /// Roll a non-terminal step back to Pending (input-request and replay
    /// paths); volatile execution state is cleared.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.result = None;
        self.error = None;
        self.metadata = StepMetadata::default();
    }

    fn stamp_completed(&mut self) {
        let now = Utc::now();
        self.metadata.completed_at = Some(now);
        if let Some(started) = self.metadata.started_at {
            self.metadata.duration_ms =
                Some((now - started).num_milliseconds().max(0) as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::action::ActionKind;
    use serde_json::json;

    #[test]
    fn test_condition_equals() {
        let condition = FailureCondition::new("text", ConditionOp::Equals, json!("Out of stock"));
        assert!(condition.evaluate(&json!({"text": "Out of stock"})));
        assert!(!condition.evaluate(&json!({"text": "$899"})));
    }

    #[test]
    fn test_condition_contains_on_strings_and_arrays() {
        let condition = FailureCondition::new("text", ConditionOp::Contains, json!("stock"));
        assert!(condition.evaluate(&json!({"text": "Out of stock"})));
        let condition = FailureCondition::new("tags", ConditionOp::Contains, json!("sold"));
        assert!(condition.evaluate(&json!({"tags": ["new", "sold"]})));
        assert!(!condition.evaluate(&json!({"tags": ["new"]})));
    }

    #[test]
    fn test_condition_existence_ops() {
        let exists = FailureCondition::existence("error", ConditionOp::Exists);
        assert!(exists.evaluate(&json!({"error": "boom"})));
        assert!(!exists.evaluate(&json!({"text": "fine"})));

        let missing = FailureCondition::existence("price", ConditionOp::NotExists);
        assert!(missing.evaluate(&json!({"text": "no price here"})));
    }

    #[test]
    fn test_condition_numeric_comparison_and_dot_paths() {
        let condition =
            FailureCondition::new("stats.count", ConditionOp::LessThan, json!(3));
        assert!(condition.evaluate(&json!({"stats": {"count": 1}})));
        assert!(!condition.evaluate(&json!({"stats": {"count": 5}})));
    }

    #[test]
    fn test_step_validate_flags_malformed_condition() {
        let step = Step::new(Action::navigate("https://example.com"))
            .with_failure_conditions(vec![FailureCondition {
                field: "text".to_string(),
                op: ConditionOp::Equals,
                value: None,
            }]);
        let err = step.validate().expect_err("malformed condition");
        assert!(matches!(err, StepError::MalformedCondition { .. }));
    }

    #[test]
    fn test_step_lifecycle_metadata() {
        let mut step = Step::new(Action::wait(10));
        assert_eq!(step.status, StepStatus::Pending);
        step.mark_running();
        assert!(step.metadata.started_at.is_some());
        step.mark_success(json!({"waitedMs": 10}));
        assert_eq!(step.status, StepStatus::Success);
        assert!(step.result.is_some());
        assert!(step.error.is_none());
        assert!(step.metadata.completed_at >= step.metadata.started_at);
    }

    #[test]
    fn test_condition_op_accepts_camel_case_and_symbol_aliases() {
        let op: ConditionOp = serde_json::from_value(json!("notEquals")).expect("alias");
        assert_eq!(op, ConditionOp::NotEquals);
        let op: ConditionOp = serde_json::from_value(json!(">")).expect("alias");
        assert_eq!(op, ConditionOp::GreaterThan);
    }

    #[test]
    fn test_step_serde_round_trip() {
        let mut expected = BTreeMap::new();
        expected.insert("text".to_string(), FieldShape::String);
        let step = Step::new(
            Action::from_params(ActionKind::ExtractText, &json!({"selector": ".price"}))
                .expect("action"),
        )
        .with_id("s1")
        .with_description("grab the price")
        .with_expected_output(expected);

        let raw = serde_json::to_value(&step).expect("serialize");
        assert_eq!(raw["id"], "s1");
        assert_eq!(raw["action"]["kind"], "extract_text");
        let back: Step = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(back, step);
    }
}
