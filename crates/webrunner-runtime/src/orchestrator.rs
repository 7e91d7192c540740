//! Orchestrator - goal → plan → execute pipeline plus task control.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use thiserror::Error;

use webrunner_core::bus::ProgressBus;
use webrunner_core::executor::{
    ActionExecutor, DynamicError, DynamicExecutor, DynamicOptions, DynamicOutcome, ExecContext,
    StepExecutor, TaskControl, TaskExecutor, TaskExecutorOptions,
};
use webrunner_core::id::{IdSource, UuidIdSource};
use webrunner_core::oracle::{AiOracle, PlanningContext};
use webrunner_core::planner::{PlanError, Planner};
use webrunner_core::provider::ProviderRegistry;
use webrunner_core::repo::{
    ExecutionHistoryRepository, HistoryEntry, RepoError, TaskRepository,
};
use webrunner_core::selector::{SelectionCriteria, StrategySelector};
use webrunner_core::types::{
    ProgressEvent, ProgressEventKind, Step, StepStatus, Task, TaskError, TaskStatus,
};

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("planning failed: {0}")]
    Planning(#[from] PlanError),

    #[error("task error: {0}")]
    Task(#[from] TaskError),

    #[error("repository error: {0}")]
    Repo(#[from] RepoError),

    #[error("dynamic execution failed: {0}")]
    Dynamic(#[from] DynamicError),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task '{0}' is not executing")]
    NotExecuting(String),

    #[error("task '{task_id}' cannot be resumed from {status:?}")]
    NotResumable { task_id: String, status: TaskStatus },
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    pub executor: TaskExecutorOptions,
    pub dynamic: DynamicOptions,
    /// Default selection criteria applied to every run.
    pub criteria: SelectionCriteria,
}

/// Owns the engine's collaborators and drives goals end-to-end.
pub struct Orchestrator {
    bus: Arc<ProgressBus>,
    planner: Planner,
    tasks: Arc<dyn TaskRepository>,
    history: Arc<dyn ExecutionHistoryRepository>,
    ids: Arc<dyn IdSource>,
    task_executor: TaskExecutor,
    dynamic_executor: DynamicExecutor,
    controls: Mutex<HashMap<String, Arc<TaskControl>>>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    /// Wire an orchestrator from its collaborators.
    pub fn new(
        oracle: Arc<dyn AiOracle>,
        registry: Arc<ProviderRegistry>,
        bus: Arc<ProgressBus>,
        tasks: Arc<dyn TaskRepository>,
        history: Arc<dyn ExecutionHistoryRepository>,
        options: OrchestratorOptions,
    ) -> Self {
        Self::with_ids(
            oracle,
            registry,
            bus,
            tasks,
            history,
            Arc::new(UuidIdSource),
            options,
        )
    }

    /// Wire an orchestrator with an explicit id source (deterministic runs).
    pub fn with_ids(
        oracle: Arc<dyn AiOracle>,
        registry: Arc<ProviderRegistry>,
        bus: Arc<ProgressBus>,
        tasks: Arc<dyn TaskRepository>,
        history: Arc<dyn ExecutionHistoryRepository>,
        ids: Arc<dyn IdSource>,
        options: OrchestratorOptions,
    ) -> Self {
        let selector = Arc::new(StrategySelector::new(registry));
        let actions = Arc::new(ActionExecutor::new(ids.clone()));
        let step_executor = StepExecutor::new(
            selector.clone(),
            actions.clone(),
            bus.clone(),
            options.executor.step.clone(),
        );
        let task_executor =
            TaskExecutor::new(step_executor, bus.clone(), options.executor.clone());
        let dynamic_executor = DynamicExecutor::new(
            oracle.clone(),
            selector,
            actions,
            bus.clone(),
            ids.clone(),
            options.dynamic.clone(),
        );

        let orchestrator = Self {
            bus: bus.clone(),
            planner: Planner::new(oracle),
            tasks,
            history: history.clone(),
            ids,
            task_executor,
            dynamic_executor,
            controls: Mutex::new(HashMap::new()),
            options,
        };
        mirror_events_into_history(&bus, history);
        orchestrator
    }

    /// The event bus observers subscribe to.
    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    /// Plan and execute a goal. Ownership of the returned task is the
    /// caller's; its status tells whether it completed, failed, paused, or
    /// is waiting for input.
    pub async fn run_goal(&self, goal: &str) -> Result<Task, OrchestratorError> {
        let task_id = self.ids.next_id();
        self.emit(&task_id, ProgressEventKind::TaskStarted, json!({"goal": goal}));
        self.emit(&task_id, ProgressEventKind::TaskPlanning, json!({}));
        tracing::info!(task_id = %task_id, goal, "planning started");

        let task = match self.planner.plan(goal, &PlanningContext::new()).await {
            Ok(task) => task.with_id(task_id.clone()),
            Err(err) => {
                self.emit(
                    &task_id,
                    ProgressEventKind::TaskFailed,
                    json!({"error": err.to_string()}),
                );
                return Err(err.into());
            }
        };
        self.emit(
            &task_id,
            ProgressEventKind::TaskPlanReady,
            json!({"steps": task.steps.len()}),
        );
        tracing::info!(task_id = %task_id, steps = task.steps.len(), "plan ready");

        self.run_task(task).await
    }

    /// Execute an already-built task (a caller-supplied plan).
    pub async fn execute_task(&self, task: Task) -> Result<Task, OrchestratorError> {
        self.emit(
            &task.id,
            ProgressEventKind::TaskStarted,
            json!({"goal": task.goal}),
        );
        self.run_task(task).await
    }

    async fn run_task(&self, mut task: Task) -> Result<Task, OrchestratorError> {
        let control = self.register_control(&task.id);
        self.tasks.save(&task).await?;

        let ctx = ExecContext::new()
            .for_task(task.id.clone())
            .with_criteria(self.options.criteria.clone())
            .with_control(control);
        let run = self.task_executor.execute(&mut task, &ctx).await;
        self.finish_run(&mut task, run).await?;
        Ok(task)
    }

    /// Resume a paused or input-waiting task by id.
    pub async fn resume(&self, task_id: &str) -> Result<Task, OrchestratorError> {
        let mut task = self
            .tasks
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        if !matches!(
            task.status,
            TaskStatus::Paused | TaskStatus::WaitingForInput
        ) {
            return Err(OrchestratorError::NotResumable {
                task_id: task_id.to_string(),
                status: task.status,
            });
        }

        let control = self.register_control(&task.id);
        let ctx = ExecContext::new()
            .for_task(task.id.clone())
            .with_criteria(self.options.criteria.clone())
            .with_control(control);
        let run = self.task_executor.resume(&mut task, &ctx).await;
        self.finish_run(&mut task, run).await?;
        Ok(task)
    }

    /// Request a pause; takes effect after the in-flight step completes.
    pub fn pause(&self, task_id: &str) -> Result<(), OrchestratorError> {
        self.with_control(task_id, |control| control.pause())
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self, task_id: &str) -> Result<(), OrchestratorError> {
        self.with_control(task_id, |control| control.cancel())
    }

    /// Attach a human answer to a waiting task and record the event; the
    /// caller resumes the task separately.
    pub async fn provide_input(
        &self,
        task_id: &str,
        input: Value,
    ) -> Result<(), OrchestratorError> {
        let mut task = self
            .tasks
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        task.provide_input(input.clone());
        self.tasks.save(&task).await?;
        self.emit(
            task_id,
            ProgressEventKind::InputProvided,
            json!({"input": input}),
        );
        Ok(())
    }

    /// Run the dynamic feedback loop for a goal.
    pub async fn run_dynamic(&self, goal: &str) -> Result<DynamicOutcome, OrchestratorError> {
        let run_id = self.ids.next_id();
        let control = self.register_control(&run_id);
        let ctx = ExecContext::new()
            .for_task(run_id.clone())
            .with_criteria(self.options.criteria.clone())
            .with_control(control);
        let outcome = self.dynamic_executor.execute_with_feedback(goal, &ctx).await;
        self.drop_control(&run_id);
        let outcome = outcome?;
        self.history
            .save(HistoryEntry::step_result(
                &run_id,
                outcome.context_snapshot.clone(),
            ))
            .await?;
        Ok(outcome)
    }

    /// Replay a persisted task: a fresh task with the same goal and plan
    /// (volatile step state cleared) is executed under a new id. The stored
    /// original is left untouched.
    pub async fn replay(&self, task_id: &str) -> Result<Task, OrchestratorError> {
        let original = self
            .tasks
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;

        let steps: Vec<Step> = original
            .steps
            .iter()
            .map(|step| {
                let mut step = step.clone();
                step.reset();
                step
            })
            .collect();
        let replay_id = self.ids.next_id();
        let task = Task::new(original.goal.clone(), steps).with_id(replay_id.clone());

        self.emit(
            &replay_id,
            ProgressEventKind::ReplayStarted,
            json!({"originalTaskId": original.id, "goal": original.goal}),
        );
        tracing::info!(
            original = %original.id,
            replay = %replay_id,
            "replay started"
        );
        self.execute_task(task).await
    }

    async fn finish_run(
        &self,
        task: &mut Task,
        run: Result<webrunner_core::types::ExecutionResult, TaskError>,
    ) -> Result<(), OrchestratorError> {
        if task.status.is_terminal() {
            self.drop_control(&task.id);
        }
        self.tasks.save(task).await?;
        for step in &task.steps {
            if step.status == StepStatus::Success || step.status == StepStatus::Failed {
                self.history
                    .save(HistoryEntry::step_result(
                        &task.id,
                        json!({
                            "stepId": step.id,
                            "status": step.status,
                            "result": step.result,
                            "error": step.error,
                            "providerUsed": step.metadata.provider_used,
                            "retryCount": step.metadata.retry_count,
                        }),
                    ))
                    .await?;
            }
        }
        run?;
        Ok(())
    }

    fn register_control(&self, task_id: &str) -> Arc<TaskControl> {
        let control = Arc::new(TaskControl::new());
        self.controls
            .lock()
            .expect("controls lock poisoned")
            .insert(task_id.to_string(), control.clone());
        control
    }

    fn drop_control(&self, task_id: &str) {
        self.controls
            .lock()
            .expect("controls lock poisoned")
            .remove(task_id);
    }

    fn with_control(
        &self,
        task_id: &str,
        f: impl FnOnce(&TaskControl),
    ) -> Result<(), OrchestratorError> {
        let controls = self.controls.lock().expect("controls lock poisoned");
        let control = controls
            .get(task_id)
            .ok_or_else(|| OrchestratorError::NotExecuting(task_id.to_string()))?;
        f(control);
        Ok(())
    }

    fn emit(&self, task_id: &str, kind: ProgressEventKind, data: Value) {
        self.bus.emit(ProgressEvent::new(kind, task_id, data));
    }
}

/// Mirror every bus event into the history repository. Persistence is
/// best-effort and never blocks emission.
fn mirror_events_into_history(
    bus: &Arc<ProgressBus>,
    history: Arc<dyn ExecutionHistoryRepository>,
) {
    bus.subscribe_any(move |event| {
        let entry = HistoryEntry::event(
            event.task_id.clone(),
            serde_json::to_value(event).unwrap_or(Value::Null),
        );
        let history = history.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = history.save(entry).await {
                    tracing::warn!(error = %err, "failed to persist progress event");
                }
            });
        }
    });
}
