//! Dynamic executor (AI feedback loop)
//!
//! Alternative to the static task executor when no plan is known up front:
//! execute → extract → decide → repeat, guarded by iteration, wall-clock,
//! and cycle budgets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use thiserror::Error;

use super::action::ActionExecutor;
use super::context::{DynamicContext, StopReason};
use super::ExecContext;
use crate::bus::ProgressBus;
use crate::id::IdSource;
use crate::oracle::{AiOracle, OracleError};
use crate::page::{select_texts, PageStateExtractor};
use crate::provider::ProviderContext;
use crate::selector::StrategySelector;
use crate::types::{
    Action, ExecutionResult, ProgressEvent, ProgressEventKind,
};

/// Dynamic loop options with documented defaults.
#[derive(Debug, Clone)]
pub struct DynamicOptions {
    /// Hard ceiling on executed actions.
    pub max_iterations: u32,
    /// Hard wall-clock budget for the whole run.
    pub timeout: Duration,
    /// Number of visits to one URL that counts as a navigation loop.
    pub cycle_threshold: u32,
}

impl Default for DynamicOptions {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            timeout: Duration::from_secs(120),
            cycle_threshold: 3,
        }
    }
}

/// Dynamic executor errors.
#[derive(Debug, Error)]
pub enum DynamicError {
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),
}

/// Terminal outcome of a dynamic run.
#[derive(Debug, Clone)]
pub struct DynamicOutcome {
    pub success: bool,
    pub collected: Value,
    pub summary: String,
    pub context_snapshot: Value,
    pub iterations: u32,
}

/// Oracle-driven feedback-loop executor.
pub struct DynamicExecutor {
    oracle: Arc<dyn AiOracle>,
    selector: Arc<StrategySelector>,
    actions: Arc<ActionExecutor>,
    extractor: PageStateExtractor,
    bus: Arc<ProgressBus>,
    ids: Arc<dyn IdSource>,
    options: DynamicOptions,
}

impl DynamicExecutor {
    /// Create a dynamic executor.
    pub fn new(
        oracle: Arc<dyn AiOracle>,
        selector: Arc<StrategySelector>,
        actions: Arc<ActionExecutor>,
        bus: Arc<ProgressBus>,
        ids: Arc<dyn IdSource>,
        options: DynamicOptions,
    ) -> Self {
        Self {
            oracle,
            selector,
            actions,
            extractor: PageStateExtractor::new(),
            bus,
            ids,
            options,
        }
    }

    /// Run the feedback loop for a goal until a termination condition is
    /// met: goal achieved, budgets exhausted, failure marked, or a
    /// navigation cycle detected.
    pub async fn execute_with_feedback(
        &self,
        goal: &str,
        exec_ctx: &ExecContext,
    ) -> Result<DynamicOutcome, DynamicError> {
        let run_id = exec_ctx
            .task_id
            .clone()
            .unwrap_or_else(|| self.ids.next_id());
        let mut ctx = DynamicContext::new(goal, &self.options);

        self.emit(
            &run_id,
            ProgressEventKind::TaskStarted,
            json!({"goal": goal, "mode": "dynamic"}),
        );
        tracing::info!(goal, run_id = %run_id, "dynamic execution started");

        let stop_reason = loop {
            if let Err(reason) = ctx.should_continue() {
                break reason;
            }
            if exec_ctx.control.is_cancelled() {
                ctx.mark_failed("dynamic run cancelled");
                break StopReason::Failed;
            }
            if let Some((url, count)) = ctx.detect_cycle(self.options.cycle_threshold) {
                let reason = format!("navigation loop on {url} ({count} visits)");
                tracing::warn!(run_id = %run_id, url, count, "cycle detected");
                ctx.mark_failed(reason);
                break StopReason::Failed;
            }

            let decision = self.oracle.decide_next_action(&ctx.view()).await?;
            tracing::debug!(
                run_id = %run_id,
                goal_achieved = decision.goal_achieved,
                has_action = decision.next_action.is_some(),
                "oracle decision"
            );

            let Some(proposal) = decision.next_action.filter(|_| !decision.goal_achieved) else {
                ctx.mark_goal_achieved(decision.reasoning);
                break StopReason::GoalAchieved;
            };

            let action = match Action::from_params(proposal.kind, &proposal.params) {
                Ok(action) => action,
                Err(err) => {
                    ctx.mark_failed(format!("oracle proposed an invalid action: {err}"));
                    break StopReason::Failed;
                }
            };

            let started = Instant::now();
            let result = self.run_action(&action, exec_ctx, &run_id).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            ctx.record_action(&action, &result, elapsed_ms);

            if let Some(data) = result.data() {
                self.absorb_result(&mut ctx, &decision.data_to_extract, data);
            }

            self.emit(
                &run_id,
                ProgressEventKind::ProgressUpdate,
                json!({
                    "iteration": ctx.iterations(),
                    "maxIterations": self.options.max_iterations,
                    "action": action.kind().as_str(),
                    "success": result.is_success(),
                }),
            );
        };

        match stop_reason {
            StopReason::IterationBudgetExhausted => {
                ctx.mark_failed(format!(
                    "iteration budget exhausted ({} of {})",
                    ctx.iterations(),
                    self.options.max_iterations
                ));
            }
            StopReason::TimeBudgetExhausted => {
                ctx.mark_failed(format!(
                    "time budget exhausted after {} ms",
                    ctx.elapsed().as_millis()
                ));
            }
            StopReason::GoalAchieved | StopReason::Failed => {}
        }

        let success = ctx.goal_achieved();
        let summary = summarize(&ctx, &stop_reason);
        self.emit(
            &run_id,
            if success {
                ProgressEventKind::TaskCompleted
            } else {
                ProgressEventKind::TaskFailed
            },
            json!({
                "summary": summary,
                "iterations": ctx.iterations(),
                "error": ctx.failure_reason(),
            }),
        );
        tracing::info!(
            run_id = %run_id,
            success,
            iterations = ctx.iterations(),
            "dynamic execution finished"
        );

        Ok(DynamicOutcome {
            success,
            collected: json!(ctx.collected()),
            summary,
            context_snapshot: ctx.snapshot(),
            iterations: ctx.iterations(),
        })
    }

    async fn run_action(
        &self,
        action: &Action,
        exec_ctx: &ExecContext,
        run_id: &str,
    ) -> ExecutionResult {
        let selection = match self.selector.select(action, &exec_ctx.criteria).await {
            Ok(selection) => selection,
            Err(err) => return ExecutionResult::failure_classified(err.to_string()),
        };
        let mut provider_ctx = ProviderContext::new().for_task(run_id.to_string());
        provider_ctx.vars = exec_ctx.vars.clone();
        self.actions
            .execute(action, selection.provider.as_ref(), &provider_ctx)
            .await
    }

    /// Update the page state from a navigation-style result and collect the
    /// values the oracle asked for. A null selector reads the key straight
    /// off the result data; otherwise the selector runs against the page
    /// HTML first and falls back to a result field of the same name.
    fn absorb_result(
        &self,
        ctx: &mut DynamicContext,
        to_extract: &std::collections::BTreeMap<String, Option<String>>,
        data: &Value,
    ) {
        let html = data.get("html").and_then(Value::as_str);
        if let Some(html) = html {
            let url = data
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or_default();
            ctx.update_page_state(self.extractor.extract(url, html));
        }

        for (key, selector) in to_extract {
            let value = match selector {
                None => data.get(key).cloned(),
                Some(selector) => {
                    let from_page = html
                        .map(|html| select_texts(html, selector, true))
                        .unwrap_or_default();
                    let mut texts = from_page.into_iter();
                    match (texts.next(), texts.next()) {
                        (None, _) => data
                            .get(selector.as_str())
                            .or_else(|| data.get(key))
                            .cloned(),
                        (Some(only), None) => Some(Value::String(only)),
                        (Some(first), Some(second)) => {
                            let mut all = vec![first, second];
                            all.extend(texts);
                            Some(json!(all))
                        }
                    }
                }
            };
            if let Some(value) = value {
                ctx.collect(key.clone(), value);
            }
        }
    }

    fn emit(&self, run_id: &str, kind: ProgressEventKind, data: Value) {
        self.bus.emit(ProgressEvent::new(kind, run_id, data));
    }
}

fn summarize(ctx: &DynamicContext, stop: &StopReason) -> String {
    match stop {
        StopReason::GoalAchieved => format!(
            "goal achieved after {} actions; collected {} values",
            ctx.iterations(),
            ctx.collected().len()
        ),
        StopReason::Failed => format!(
            "failed after {} actions: {}",
            ctx.iterations(),
            ctx.failure_reason().unwrap_or("unknown reason")
        ),
        StopReason::IterationBudgetExhausted => {
            format!("stopped at iteration budget ({})", ctx.iterations())
        }
        StopReason::TimeBudgetExhausted => format!(
            "stopped at time budget after {} actions",
            ctx.iterations()
        ),
    }
}
