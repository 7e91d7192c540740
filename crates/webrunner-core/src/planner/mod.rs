//! Planner module
//!
//! Turns an oracle plan draft into an executable [`Task`]. Every draft step
//! is validated through the canonical Action constructor before execution;
//! an invalid draft is rejected with the offending step named.

use std::sync::Arc;

use thiserror::Error;

use crate::oracle::{AiOracle, OracleError, PlanningContext};
use crate::types::{Action, ActionError, Step, Task};

/// Planner errors
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("oracle returned an empty plan")]
    EmptyPlan,

    #[error("plan step {index} is invalid: {source}")]
    InvalidStep {
        index: usize,
        #[source]
        source: ActionError,
    },
}

/// Plans a task for a goal via the AI oracle.
pub struct Planner {
    oracle: Arc<dyn AiOracle>,
}

impl Planner {
    /// Create a planner backed by the given oracle.
    pub fn new(oracle: Arc<dyn AiOracle>) -> Self {
        Self { oracle }
    }

    /// Generate and validate a plan, returning a pending task.
    pub async fn plan(&self, goal: &str, ctx: &PlanningContext) -> Result<Task, PlanError> {
        let draft = self.oracle.generate_plan(goal, ctx).await?;
        tracing::debug!(
            goal,
            steps = draft.steps.len(),
            confidence = draft.confidence,
            "plan draft received"
        );

        if draft.steps.is_empty() {
            return Err(PlanError::EmptyPlan);
        }

        let mut steps = Vec::with_capacity(draft.steps.len());
        for (index, draft_step) in draft.steps.into_iter().enumerate() {
            let action = Action::from_params(draft_step.kind, &draft_step.params)
                .map_err(|source| PlanError::InvalidStep { index, source })?;
            let mut step = Step::new(action).with_description(draft_step.description);
            if let Some(expected) = draft_step.expected_output {
                step = step.with_expected_output(expected);
            }
            if let Some(conditions) = draft_step.failure_conditions {
                step = step.with_failure_conditions(conditions);
            }
            steps.push(step);
        }

        tracing::info!(goal, steps = steps.len(), "plan validated");
        Ok(Task::new(goal, steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ContextView;
    use crate::oracle::{Decision, PlanDraft, SelectorSuggestions, StepDraft};
    use crate::types::{ActionKind, TaskStatus};
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedPlanOracle {
        draft: PlanDraft,
    }

    #[async_trait]
    impl AiOracle for FixedPlanOracle {
        async fn generate_plan(
            &self,
            _goal: &str,
            _ctx: &PlanningContext,
        ) -> Result<PlanDraft, OracleError> {
            Ok(self.draft.clone())
        }

        async fn suggest_selectors(
            &self,
            _page_summary: &str,
            _intent: &str,
            _ctx: &PlanningContext,
        ) -> Result<SelectorSuggestions, OracleError> {
            Ok(SelectorSuggestions {
                selectors: Vec::new(),
                reasoning: String::new(),
            })
        }

        async fn decide_next_action(&self, _view: &ContextView) -> Result<Decision, OracleError> {
            Ok(Decision {
                goal_achieved: true,
                reasoning: String::new(),
                next_action: None,
                data_to_extract: Default::default(),
            })
        }
    }

    fn draft_step(kind: ActionKind, params: serde_json::Value) -> StepDraft {
        StepDraft {
            kind,
            params,
            description: "step".to_string(),
            expected_output: None,
            failure_conditions: None,
        }
    }

    #[tokio::test]
    async fn test_valid_draft_becomes_pending_task() {
        let planner = Planner::new(Arc::new(FixedPlanOracle {
            draft: PlanDraft {
                steps: vec![
                    draft_step(ActionKind::Navigate, json!({"url": "https://x"})),
                    draft_step(ActionKind::ExtractText, json!({"selector": ".price"})),
                ],
                confidence: 0.9,
                reasoning: "straightforward".to_string(),
            },
        }));

        let task = planner
            .plan("get prices", &PlanningContext::new())
            .await
            .expect("plan");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.steps.len(), 2);
        assert_eq!(task.goal, "get prices");
    }

    #[tokio::test]
    async fn test_invalid_step_is_rejected_with_its_index() {
        let planner = Planner::new(Arc::new(FixedPlanOracle {
            draft: PlanDraft {
                steps: vec![
                    draft_step(ActionKind::Navigate, json!({"url": "https://x"})),
                    draft_step(ActionKind::Type, json!({"selector": "#q"})),
                ],
                confidence: 0.4,
                reasoning: String::new(),
            },
        }));

        let err = planner
            .plan("type a query", &PlanningContext::new())
            .await
            .expect_err("invalid plan");
        match err {
            PlanError::InvalidStep { index, .. } => assert_eq!(index, 1),
            other => panic!("expected InvalidStep, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_plan_is_rejected() {
        let planner = Planner::new(Arc::new(FixedPlanOracle {
            draft: PlanDraft {
                steps: Vec::new(),
                confidence: 0.0,
                reasoning: String::new(),
            },
        }));
        let err = planner
            .plan("do nothing", &PlanningContext::new())
            .await
            .expect_err("empty plan");
        assert!(matches!(err, PlanError::EmptyPlan));
    }
}
