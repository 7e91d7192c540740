//! AI oracle trait surface
//!
//! The oracle is an external collaborator that plans, suggests selectors,
//! and steers the dynamic feedback loop. Every method returns structured
//! records, never prose; implementations live outside this crate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::executor::ContextView;
use crate::types::{ActionKind, FailureCondition, FieldShape};

/// Oracle errors
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle backend error: {0}")]
    Backend(String),

    #[error("oracle returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Context handed to planning calls.
#[derive(Debug, Clone, Default)]
pub struct PlanningContext {
    /// Caller-supplied variables visible to the oracle.
    pub vars: BTreeMap<String, Value>,
}

impl PlanningContext {
    /// An empty planning context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one variable.
    pub fn with_var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.vars.insert(key.into(), value);
        self
    }
}

/// One step of a generated plan, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDraft {
    pub kind: ActionKind,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<BTreeMap<String, FieldShape>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_conditions: Option<Vec<FailureCondition>>,
}

/// A generated plan, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDraft {
    pub steps: Vec<StepDraft>,
    /// Oracle's confidence in [0, 1].
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
}

/// One selector suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorSuggestion {
    pub purpose: String,
    pub selector: String,
    #[serde(default)]
    pub confidence: f32,
}

/// Selector suggestions for an intent on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorSuggestions {
    pub selectors: Vec<SelectorSuggestion>,
    #[serde(default)]
    pub reasoning: String,
}

/// The action the oracle proposes next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionProposal {
    pub kind: ActionKind,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub description: String,
}

/// Decision returned by [`AiOracle::decide_next_action`]. A `None`
/// next_action means the oracle sees nothing further to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub goal_achieved: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<ActionProposal>,
    /// Data to pull from the result: key → selector (or null to read the
    /// key straight off the result data).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data_to_extract: BTreeMap<String, Option<String>>,
}

/// One recovery suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySuggestion {
    pub kind: ActionKind,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub reasoning: String,
}

/// Outcome of an error-recovery consultation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recovery {
    pub recoverable: bool,
    #[serde(default)]
    pub suggestions: Vec<RecoverySuggestion>,
}

impl Recovery {
    /// The default-deny answer.
    pub fn unrecoverable() -> Self {
        Self {
            recoverable: false,
            suggestions: Vec::new(),
        }
    }
}

/// AI oracle interface consumed by the planner and the dynamic executor.
#[async_trait]
pub trait AiOracle: Send + Sync {
    /// Generate a plan for a goal. Callers validate the draft before any
    /// execution.
    async fn generate_plan(
        &self,
        goal: &str,
        ctx: &PlanningContext,
    ) -> Result<PlanDraft, OracleError>;

    /// Suggest selectors for an intent given a bounded page summary.
    async fn suggest_selectors(
        &self,
        page_summary: &str,
        intent: &str,
        ctx: &PlanningContext,
    ) -> Result<SelectorSuggestions, OracleError>;

    /// Decide the next action in the dynamic feedback loop.
    async fn decide_next_action(&self, view: &ContextView) -> Result<Decision, OracleError>;

    /// Optional: consult on error recovery. The default answer denies
    /// recovery.
    async fn recover_from_error(
        &self,
        _error: &str,
        _ctx: &PlanningContext,
    ) -> Result<Recovery, OracleError> {
        Ok(Recovery::unrecoverable())
    }
}
