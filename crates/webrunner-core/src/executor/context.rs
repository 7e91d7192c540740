//! Dynamic execution context
//!
//! State accumulated by the feedback-loop executor: collected data, action
//! history, visited URLs, the current page state, and the budgets that
//! decide termination. [`ContextView`] is the bounded projection the AI
//! oracle sees.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::dynamic::DynamicOptions;
use crate::page::PageState;
use crate::types::{Action, ExecutionResult};

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    GoalAchieved,
    Failed,
    IterationBudgetExhausted,
    TimeBudgetExhausted,
}

/// One executed action, as remembered by the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub iteration: u32,
    pub action: Action,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Accumulated state of one dynamic run.
pub struct DynamicContext {
    goal: String,
    collected: BTreeMap<String, Value>,
    history: Vec<ActionRecord>,
    visit_counts: BTreeMap<String, u32>,
    current_page: Option<PageState>,
    iterations: u32,
    goal_achieved: bool,
    goal_reasoning: Option<String>,
    failure_reason: Option<String>,
    started: Instant,
    max_iterations: u32,
    timeout: Duration,
}

impl DynamicContext {
    /// Create a fresh context for a goal with the given budgets.
    pub fn new(goal: impl Into<String>, options: &DynamicOptions) -> Self {
        Self {
            goal: goal.into(),
            collected: BTreeMap::new(),
            history: Vec::new(),
            visit_counts: BTreeMap::new(),
            current_page: None,
            iterations: 0,
            goal_achieved: false,
            goal_reasoning: None,
            failure_reason: None,
            started: Instant::now(),
            max_iterations: options.max_iterations,
            timeout: options.timeout,
        }
    }

    /// Decide whether the loop may run another iteration.
    pub fn should_continue(&self) -> Result<(), StopReason> {
        if self.goal_achieved {
            return Err(StopReason::GoalAchieved);
        }
        if self.failure_reason.is_some() {
            return Err(StopReason::Failed);
        }
        if self.iterations >= self.max_iterations {
            return Err(StopReason::IterationBudgetExhausted);
        }
        if self.started.elapsed() >= self.timeout {
            return Err(StopReason::TimeBudgetExhausted);
        }
        Ok(())
    }

    /// A cycle exists when the same URL was visited at least `threshold`
    /// times.
    pub fn detect_cycle(&self, threshold: u32) -> Option<(&str, u32)> {
        self.visit_counts
            .iter()
            .find(|(_, count)| **count >= threshold)
            .map(|(url, count)| (url.as_str(), *count))
    }

    /// Record one executed action; increments the iteration counter and the
    /// visit count of navigated URLs.
    pub fn record_action(&mut self, action: &Action, result: &ExecutionResult, elapsed_ms: u64) {
        self.iterations += 1;
        if let Some(url) = action.target_url() {
            *self.visit_counts.entry(url.to_string()).or_insert(0) += 1;
        }
        self.history.push(ActionRecord {
            iteration: self.iterations,
            action: action.clone(),
            success: result.is_success(),
            error: result.error_message().map(str::to_string),
            elapsed_ms,
        });
    }

    /// Store one collected value.
    pub fn collect(&mut self, key: impl Into<String>, value: Value) {
        self.collected.insert(key.into(), value);
    }

    /// Replace the current page state.
    pub fn update_page_state(&mut self, page: PageState) {
        self.current_page = Some(page);
    }

    /// Mark the goal achieved with the oracle's reasoning.
    pub fn mark_goal_achieved(&mut self, reasoning: impl Into<String>) {
        self.goal_achieved = true;
        self.goal_reasoning = Some(reasoning.into());
    }

    /// Mark the run failed.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn goal_achieved(&self) -> bool {
        self.goal_achieved
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn collected(&self) -> &BTreeMap<String, Value> {
        &self.collected
    }

    pub fn current_page(&self) -> Option<&PageState> {
        self.current_page.as_ref()
    }

    pub fn visited_urls(&self) -> BTreeSet<&str> {
        self.visit_counts.keys().map(String::as_str).collect()
    }

    pub fn history(&self) -> &[ActionRecord] {
        &self.history
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Bounded projection handed to the oracle.
    pub fn view(&self) -> ContextView {
        const RECENT_ACTIONS: usize = 5;
        let skip = self.history.len().saturating_sub(RECENT_ACTIONS);
        ContextView {
            goal: self.goal.clone(),
            iteration: self.iterations,
            max_iterations: self.max_iterations,
            collected: self.collected.clone(),
            recent_actions: self.history[skip..].to_vec(),
            visited_urls: self
                .visit_counts
                .keys()
                .cloned()
                .collect(),
            page: self.current_page.clone(),
        }
    }

    /// Serializable snapshot for the terminal outcome.
    pub fn snapshot(&self) -> Value {
        json!({
            "goal": self.goal,
            "iterations": self.iterations,
            "goalAchieved": self.goal_achieved,
            "goalReasoning": self.goal_reasoning,
            "failureReason": self.failure_reason,
            "collectedData": self.collected,
            "visitedUrls": self.visit_counts.keys().collect::<Vec<_>>(),
            "actionHistory": self.history,
            "elapsedMs": self.elapsed().as_millis() as u64,
        })
    }
}

/// What the oracle is shown each iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextView {
    pub goal: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub collected: BTreeMap<String, Value>,
    pub recent_actions: Vec<ActionRecord>,
    pub visited_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageState>,
}
