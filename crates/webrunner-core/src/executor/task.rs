//! Task executor (static plan)
//!
//! Sequential state machine over a task's steps. Each step runs to a
//! terminal state before the next starts; pause takes effect at step
//! boundaries; cancellation is cooperative. Ownership of the task returns
//! to the caller on every return.

use std::sync::Arc;

use serde_json::{json, Value};

use super::step::{StepExecutor, StepExecutorOptions};
use super::ExecContext;
use crate::bus::ProgressBus;
use crate::types::{
    ErrorCategory, ExecutionResult, ProgressEvent, ProgressEventKind, StepStatus, Task,
    TaskError, TaskStatus,
};

/// Task executor options with documented defaults.
#[derive(Debug, Clone, Default)]
pub struct TaskExecutorOptions {
    /// Record step failures and keep executing instead of failing the task.
    pub continue_on_step_failure: bool,
    /// Options handed to the step executor.
    pub step: StepExecutorOptions,
}

/// Drives a task through its state machine.
pub struct TaskExecutor {
    steps: StepExecutor,
    bus: Arc<ProgressBus>,
    options: TaskExecutorOptions,
}

impl TaskExecutor {
    /// Create a task executor.
    pub fn new(steps: StepExecutor, bus: Arc<ProgressBus>, options: TaskExecutorOptions) -> Self {
        Self {
            steps,
            bus,
            options,
        }
    }

    /// Execute a pending task to a boundary: Completed, Failed, Paused, or
    /// WaitingForInput.
    pub async fn execute(
        &self,
        task: &mut Task,
        ctx: &ExecContext,
    ) -> Result<ExecutionResult, TaskError> {
        task.start()?;
        self.emit(task, ProgressEventKind::TaskExecuting, json!({"goal": task.goal}));
        self.run_loop(task, ctx).await
    }

    /// Re-enter a Paused or WaitingForInput task.
    pub async fn resume(
        &self,
        task: &mut Task,
        ctx: &ExecContext,
    ) -> Result<ExecutionResult, TaskError> {
        let provided_input = task.provided_input.clone();
        task.resume()?;
        self.emit(task, ProgressEventKind::TaskResumed, json!({}));

        let mut ctx = ctx.clone();
        if let Some(input) = provided_input {
            ctx.vars.insert("providedInput".to_string(), input);
        }
        self.run_loop(task, &ctx).await
    }

    async fn run_loop(
        &self,
        task: &mut Task,
        ctx: &ExecContext,
    ) -> Result<ExecutionResult, TaskError> {
        let mut previous_results = ctx.previous_results.clone();
        previous_results.extend(
            task.steps
                .iter()
                .filter(|s| s.status == StepStatus::Success)
                .filter_map(|s| s.result.clone()),
        );

        while let Some(index) = task.next_step_index() {
            if ctx.control.take_pause_request() {
                task.pause()?;
                self.emit(task, ProgressEventKind::TaskPaused, json!({}));
                return Ok(ExecutionResult::partial(Value::Null, "task paused"));
            }
            if ctx.control.is_cancelled() {
                return self.fail_task(task, "task cancelled", None, ErrorCategory::Unknown);
            }

            let mut step = task.steps[index].clone();
            self.emit(
                task,
                ProgressEventKind::StepStarted,
                json!({
                    "stepId": step.id,
                    "description": step.description,
                    "index": index,
                }),
            );

            let mut step_ctx = ctx.clone();
            step_ctx.task_id = Some(task.id.clone());
            step_ctx.previous_results = previous_results.clone();
            let result = self.steps.execute(&mut step, &step_ctx).await;

            // A step may ask for human input through the reserved side
            // channel in its result; it stays re-runnable.
            if let Some(request) = result.input_request() {
                step.reset();
                task.update_step(step)?;
                task.request_input(request.clone())?;
                self.emit(
                    task,
                    ProgressEventKind::InputRequested,
                    json!({"prompt": request.prompt, "field": request.field}),
                );
                return Ok(ExecutionResult::partial(Value::Null, "waiting for input"));
            }

            let step_id = step.id.clone();
            let step_description = step.description.clone();
            let step_failed = step.status == StepStatus::Failed;
            let step_error = step.error.clone();
            if let Some(data) = result.data() {
                previous_results.push(data.clone());
            }
            task.update_step(step)?;

            if step_failed {
                self.emit(
                    task,
                    ProgressEventKind::StepFailed,
                    json!({
                        "stepId": step_id,
                        "description": step_description,
                        "error": step_error,
                    }),
                );
            } else {
                self.emit(
                    task,
                    ProgressEventKind::StepCompleted,
                    json!({"stepId": step_id, "result": result.data()}),
                );
            }
            self.emit_progress(task);

            if step_failed && !self.options.continue_on_step_failure {
                let message = step_error
                    .unwrap_or_else(|| format!("step '{step_id}' failed"));
                return self.fail_task(
                    task,
                    &message,
                    Some((step_id, step_description)),
                    result.category().unwrap_or(ErrorCategory::Unknown),
                );
            }

            task.advance_past(index)?;
        }

        let aggregate = build_aggregate(task);
        task.complete(aggregate.clone())?;
        self.emit(
            task,
            ProgressEventKind::TaskCompleted,
            json!({"result": aggregate, "progress": task.progress()}),
        );
        Ok(ExecutionResult::success(aggregate))
    }

    fn fail_task(
        &self,
        task: &mut Task,
        message: &str,
        failed_step: Option<(String, String)>,
        category: ErrorCategory,
    ) -> Result<ExecutionResult, TaskError> {
        task.fail(message.to_string())?;
        let (step_id, description) = failed_step.unzip();
        self.emit(
            task,
            ProgressEventKind::TaskFailed,
            json!({
                "error": message,
                "stepId": step_id,
                "stepDescription": description,
                "category": category,
            }),
        );
        Ok(ExecutionResult::failure(message.to_string(), category))
    }

    fn emit_progress(&self, task: &Task) {
        self.emit(
            task,
            ProgressEventKind::ProgressUpdate,
            json!({
                "progress": task.progress(),
                "completedSteps": task.execution_metadata.completed_steps,
                "totalSteps": task.execution_metadata.total_steps,
            }),
        );
    }

    fn emit(&self, task: &Task, kind: ProgressEventKind, data: Value) {
        self.bus
            .emit(ProgressEvent::new(kind, task.id.clone(), data));
    }
}

/// Final aggregate handed back on completion.
fn build_aggregate(task: &Task) -> Value {
    let successful: Vec<Value> = task
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Success)
        .map(|s| json!({"stepId": s.id, "description": s.description, "result": s.result}))
        .collect();
    let failed: Vec<Value> = task
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Failed)
        .map(|s| json!({"stepId": s.id, "description": s.description, "error": s.error}))
        .collect();
    let all: Vec<Value> = task
        .steps
        .iter()
        .map(|s| json!({"stepId": s.id, "status": s.status, "result": s.result}))
        .collect();
    let summary = format!(
        "{} of {} steps succeeded for goal '{}'",
        successful.len(),
        task.steps.len(),
        task.goal
    );
    json!({
        "goal": task.goal,
        "successfulSteps": successful,
        "failedSteps": failed,
        "allStepResults": all,
        "summary": summary,
    })
}
