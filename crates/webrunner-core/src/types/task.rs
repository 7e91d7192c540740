//! Task type definitions
//!
//! A Task is an ordered list of Steps pursuing a goal, with an explicit
//! state machine. Only the transitions listed on [`TaskStatus::can_transition`]
//! are legal; terminal tasks are never mutated again.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::step::{Step, StepStatus};

/// Type alias for Task ID
pub type TaskId = String;

/// Task state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    WaitingForInput,
    Failed,
    Completed,
}

impl TaskStatus {
    /// Whether the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Completed)
    }

    /// The legal transition relation:
    /// Pending→Running; Running→{Paused, WaitingForInput, Failed, Completed};
    /// Paused→{Running, Failed}; WaitingForInput→{Running, Failed}.
    pub fn can_transition(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Paused)
                | (Running, WaitingForInput)
                | (Running, Failed)
                | (Running, Completed)
                | (Paused, Running)
                | (Paused, Failed)
                | (WaitingForInput, Running)
                | (WaitingForInput, Failed)
        )
    }
}

/// Task mutation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("illegal task transition {from:?} -> {to:?}")]
    IllegalTransition { from: TaskStatus, to: TaskStatus },

    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("current step index may not move backwards ({current} -> {requested})")]
    IndexRegression { current: usize, requested: usize },
}

/// Pending request for human input, recorded on the task while it waits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRequest {
    /// Question shown to the human.
    pub prompt: String,
    /// Optional field name the answer should fill.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Creation/update bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl Default for TaskMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            extra: BTreeMap::new(),
        }
    }
}

/// Aggregated execution bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub total_steps: usize,
    #[serde(default)]
    pub completed_steps: usize,
    #[serde(default)]
    pub failed_steps: usize,
    #[serde(default)]
    pub skipped_steps: usize,
}

/// Ordered steps pursuing a goal, with an explicit state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub goal: String,
    pub status: TaskStatus,
    pub current_step_index: usize,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_input_request: Option<InputRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provided_input: Option<Value>,
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(default)]
    pub execution_metadata: TaskExecutionMetadata,
}

impl Task {
    /// Create a new pending task.
    pub fn new(goal: impl Into<String>, steps: Vec<Step>) -> Self {
        let total = steps.len();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal: goal.into(),
            status: TaskStatus::Pending,
            current_step_index: 0,
            steps,
            result: None,
            error: None,
            pending_input_request: None,
            provided_input: None,
            metadata: TaskMetadata::default(),
            execution_metadata: TaskExecutionMetadata {
                total_steps: total,
                ..TaskExecutionMetadata::default()
            },
        }
    }

    /// Override the generated id (deterministic tests, replay).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Transition the state machine; illegal transitions are errors and
    /// leave the task untouched.
    pub fn set_status(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition(next) {
            return Err(TaskError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Pending → Running; stamps the execution start.
    pub fn start(&mut self) -> Result<(), TaskError> {
        self.set_status(TaskStatus::Running)?;
        self.execution_metadata.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running → Completed with the final aggregate.
    pub fn complete(&mut self, result: Value) -> Result<(), TaskError> {
        self.set_status(TaskStatus::Completed)?;
        self.result = Some(result);
        self.stamp_finished();
        Ok(())
    }

    /// → Failed with the terminal error; remaining pending steps are skipped.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        self.set_status(TaskStatus::Failed)?;
        self.error = Some(error.into());
        for step in &mut self.steps {
            if step.status == StepStatus::Pending {
                step.mark_skipped();
            }
        }
        self.refresh_step_counts();
        self.stamp_finished();
        Ok(())
    }

    /// Running → Paused.
    pub fn pause(&mut self) -> Result<(), TaskError> {
        self.set_status(TaskStatus::Paused)
    }

    /// Paused | WaitingForInput → Running.
    pub fn resume(&mut self) -> Result<(), TaskError> {
        self.set_status(TaskStatus::Running)
    }

    /// Running → WaitingForInput, recording the request.
    pub fn request_input(&mut self, request: InputRequest) -> Result<(), TaskError> {
        self.set_status(TaskStatus::WaitingForInput)?;
        self.pending_input_request = Some(request);
        Ok(())
    }

    /// Attach a human answer; consumed by the executor on resume.
    pub fn provide_input(&mut self, input: Value) {
        self.provided_input = Some(input);
        self.pending_input_request = None;
        self.touch();
    }

    /// Index of the first Pending step at or after `current_step_index`.
    pub fn next_step_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .enumerate()
            .skip(self.current_step_index)
            .find(|(_, step)| step.status == StepStatus::Pending)
            .map(|(index, _)| index)
    }

    /// The step the executor would run next.
    pub fn next_step(&self) -> Option<&Step> {
        self.next_step_index().map(|index| &self.steps[index])
    }

    /// Advance `current_step_index` past the given position; the index is
    /// monotone and never moves backwards.
    pub fn advance_past(&mut self, index: usize) -> Result<(), TaskError> {
        let requested = index + 1;
        if requested < self.current_step_index {
            return Err(TaskError::IndexRegression {
                current: self.current_step_index,
                requested,
            });
        }
        self.current_step_index = requested;
        self.touch();
        Ok(())
    }

    /// Replace a step (matched by id) with its executed version and refresh
    /// the aggregate counters.
    pub fn update_step(&mut self, step: Step) -> Result<(), TaskError> {
        let slot = self
            .steps
            .iter_mut()
            .find(|s| s.id == step.id)
            .ok_or_else(|| TaskError::StepNotFound(step.id.clone()))?;
        *slot = step;
        self.refresh_step_counts();
        self.touch();
        Ok(())
    }

    /// Look up a step by id.
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Percentage of steps in a terminal non-failed state, rounded, in
    /// [0, 100]. An empty task reads 100 once completed.
    pub fn progress(&self) -> u8 {
        if self.steps.is_empty() {
            return if self.status == TaskStatus::Completed {
                100
            } else {
                0
            };
        }
        let done = self
            .steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Success | StepStatus::Skipped))
            .count();
        ((done as f64 / self.steps.len() as f64) * 100.0).round() as u8
    }

    fn refresh_step_counts(&mut self) {
        self.execution_metadata.total_steps = self.steps.len();
        self.execution_metadata.completed_steps = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Success)
            .count();
        self.execution_metadata.failed_steps = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count();
        self.execution_metadata.skipped_steps = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Skipped)
            .count();
    }

    fn stamp_finished(&mut self) {
        let now = Utc::now();
        self.execution_metadata.completed_at = Some(now);
        if let Some(started) = self.execution_metadata.started_at {
            self.execution_metadata.duration_ms =
                Some((now - started).num_milliseconds().max(0) as u64);
        }
    }

    fn touch(&mut self) {
        self.metadata.updated_at = Utc::now();
    }
}
