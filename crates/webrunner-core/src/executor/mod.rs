//! Executor module
//!
//! Four layers, composed bottom-up:
//! - [`ActionExecutor`]: one validated action against one provider
//! - [`StepExecutor`]: retry with backoff, strategy fallback, result checks
//! - [`TaskExecutor`]: sequential state machine over a static plan
//! - [`DynamicExecutor`]: oracle-feedback loop when no plan exists up front
//!
//! Execution of a single task is single-threaded cooperative: at most one
//! step, and within it one provider call, is in flight at a time.

mod action;
mod context;
mod dynamic;
mod step;
mod task;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::selector::SelectionCriteria;

pub use action::ActionExecutor;
pub use context::{ActionRecord, ContextView, DynamicContext, StopReason};
pub use dynamic::{DynamicError, DynamicExecutor, DynamicOptions, DynamicOutcome};
pub use step::{StepExecutor, StepExecutorOptions};
pub use task::{TaskExecutor, TaskExecutorOptions};

/// Cooperative control handle for one task execution.
///
/// Pause takes effect at the next step boundary; cancellation is observed at
/// suspension points only, so the in-flight provider call always runs to
/// completion.
#[derive(Debug, Default)]
pub struct TaskControl {
    pause_requested: AtomicBool,
    cancel: CancellationToken,
}

impl TaskControl {
    /// Create a fresh control handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a pause after the current step.
    pub fn pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Consume a pending pause request.
    pub fn take_pause_request(&self) -> bool {
        self.pause_requested.swap(false, Ordering::SeqCst)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token observed inside retry sleeps.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Execution context threaded through the executors.
#[derive(Clone)]
pub struct ExecContext {
    /// Task this execution belongs to.
    pub task_id: Option<String>,
    /// Caller-supplied variables, merged into each step's provider context.
    pub vars: BTreeMap<String, Value>,
    /// Results of prior successful steps, in order.
    pub previous_results: Vec<Value>,
    /// Strategy-selection criteria for every step.
    pub criteria: SelectionCriteria,
    /// Cooperative pause/cancel handle.
    pub control: Arc<TaskControl>,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self {
            task_id: None,
            vars: BTreeMap::new(),
            previous_results: Vec::new(),
            criteria: SelectionCriteria::default(),
            control: Arc::new(TaskControl::new()),
        }
    }
}

impl ExecContext {
    /// Create an empty context with its own control handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the owning task id.
    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Replace the selection criteria.
    pub fn with_criteria(mut self, criteria: SelectionCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Share an existing control handle.
    pub fn with_control(mut self, control: Arc<TaskControl>) -> Self {
        self.control = control;
        self
    }

    /// Set a caller variable.
    pub fn with_var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.vars.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_request_is_consumed_once() {
        let control = TaskControl::new();
        control.pause();
        assert!(control.take_pause_request());
        assert!(!control.take_pause_request());
    }

    #[test]
    fn test_cancellation_is_sticky() {
        let control = TaskControl::new();
        assert!(!control.is_cancelled());
        control.cancel();
        assert!(control.is_cancelled());
        assert!(control.is_cancelled());
    }
}
