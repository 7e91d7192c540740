//! ProgressEvent type definitions
//!
//! Typed events are the sole observable during execution; every layer emits
//! into the bus and observers subscribe per kind or for everything.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of progress event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    TaskStarted,
    TaskPlanning,
    TaskPlanReady,
    TaskExecuting,
    StepStarted,
    StepCompleted,
    StepFailed,
    StepRetrying,
    ProviderFallback,
    InputRequested,
    InputProvided,
    TaskPaused,
    TaskResumed,
    TaskCompleted,
    TaskFailed,
    ProgressUpdate,
    ReplayStarted,
}

impl ProgressEventKind {
    /// Stable wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskStarted => "task_started",
            Self::TaskPlanning => "task_planning",
            Self::TaskPlanReady => "task_plan_ready",
            Self::TaskExecuting => "task_executing",
            Self::StepStarted => "step_started",
            Self::StepCompleted => "step_completed",
            Self::StepFailed => "step_failed",
            Self::StepRetrying => "step_retrying",
            Self::ProviderFallback => "provider_fallback",
            Self::InputRequested => "input_requested",
            Self::InputProvided => "input_provided",
            Self::TaskPaused => "task_paused",
            Self::TaskResumed => "task_resumed",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::ProgressUpdate => "progress_update",
            Self::ReplayStarted => "replay_started",
        }
    }
}

impl fmt::Display for ProgressEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ProgressEventKind,
    pub task_id: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Create a new event with a generated id.
    pub fn new(kind: ProgressEventKind, task_id: impl Into<String>, data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            task_id: task_id.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Override the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_kind_under_type_key() {
        let event = ProgressEvent::new(
            ProgressEventKind::StepCompleted,
            "task-1",
            json!({"stepId": "s1"}),
        );
        let raw = serde_json::to_value(&event).expect("serialize");
        assert_eq!(raw["type"], "step_completed");
        assert_eq!(raw["taskId"], "task-1");
        let back: ProgressEvent = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(back, event);
    }
}
