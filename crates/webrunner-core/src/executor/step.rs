//! Step executor
//!
//! Drives one step to a terminal state: select a provider, retry with
//! monotonic backoff on the same provider, fall back across strategies when
//! retries are exhausted, validate the result against the step's contract.
//!
//! Retries on a strategy always finish before its fallback is attempted, and
//! at most one provider call is in flight per step.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use super::action::ActionExecutor;
use super::ExecContext;
use crate::bus::ProgressBus;
use crate::provider::ProviderContext;
use crate::selector::{Selection, StrategySelector};
use crate::types::{
    Action, ErrorCategory, ExecutionResult, ProgressEvent, ProgressEventKind, Step,
};

/// Step executor options with documented defaults.
#[derive(Debug, Clone)]
pub struct StepExecutorOptions {
    /// Retries per strategy after the first attempt.
    pub max_retries: u32,
    /// Base delay before the first retry.
    pub retry_delay: Duration,
    /// Multiplier applied per retry; clamped to at least 1 so delays are
    /// monotonic non-decreasing.
    pub backoff_factor: f64,
    /// Optional wall-clock budget for the whole step.
    pub step_timeout: Option<Duration>,
}

impl Default for StepExecutorOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            step_timeout: None,
        }
    }
}

/// Executes one step with retry, fallback, and result validation.
#[derive(Clone)]
pub struct StepExecutor {
    selector: Arc<StrategySelector>,
    actions: Arc<ActionExecutor>,
    bus: Arc<ProgressBus>,
    options: StepExecutorOptions,
}

impl StepExecutor {
    /// Create a step executor.
    pub fn new(
        selector: Arc<StrategySelector>,
        actions: Arc<ActionExecutor>,
        bus: Arc<ProgressBus>,
        options: StepExecutorOptions,
    ) -> Self {
        Self {
            selector,
            actions,
            bus,
            options,
        }
    }

    /// Execute the step to a terminal status, updating it in place.
    pub async fn execute(&self, step: &mut Step, ctx: &ExecContext) -> ExecutionResult {
        if let Err(err) = step.validate() {
            let message = err.to_string();
            step.mark_failed(message.clone());
            return ExecutionResult::failure(message, ErrorCategory::ValidationError);
        }

        match self.options.step_timeout {
            None => self.run(step, ctx).await,
            Some(limit) => self.run_with_timeout(step, ctx, limit).await,
        }
    }

    /// Wall-clock-bounded variant. The attempt loop runs on its own task so
    /// that expiry does not interrupt the in-flight provider call; the
    /// detached attempt finishes on its own and its step mutations are
    /// discarded.
    async fn run_with_timeout(
        &self,
        step: &mut Step,
        ctx: &ExecContext,
        limit: Duration,
    ) -> ExecutionResult {
        let started = Instant::now();
        let this = self.clone();
        let ctx = ctx.clone();
        let mut owned = step.clone();
        let handle = tokio::spawn(async move {
            let result = this.run(&mut owned, &ctx).await;
            (owned, result)
        });

        match tokio::time::timeout(limit, handle).await {
            Ok(Ok((executed, result))) => {
                *step = executed;
                result
            }
            Ok(Err(join_err)) => {
                let message = format!("step execution aborted: {join_err}");
                step.mark_failed(message.clone());
                ExecutionResult::failure(message, ErrorCategory::Unknown)
            }
            Err(_) => {
                step.mark_failed(format!(
                    "step exceeded wall-clock budget of {} ms",
                    limit.as_millis()
                ));
                ExecutionResult::timeout(started.elapsed().as_millis() as u64)
            }
        }
    }

    async fn run(&self, step: &mut Step, ctx: &ExecContext) -> ExecutionResult {
        step.mark_running();
        let action = step.action.clone();

        let mut selection = match self.selector.select(&action, &ctx.criteria).await {
            Ok(selection) => selection,
            Err(err) => {
                let message = err.to_string();
                step.mark_failed(message.clone());
                return ExecutionResult::failure(message, ErrorCategory::ProviderError);
            }
        };

        let provider_ctx = provider_context_for(step, ctx);

        loop {
            let last_failure = match self
                .attempt_on_provider(step, ctx, &action, &selection, &provider_ctx)
                .await
            {
                AttemptOutcome::Finished(result) => return result,
                AttemptOutcome::Exhausted(result) => result,
            };

            if !last_failure.is_retryable() {
                return self.finalize_failure(step, &selection, last_failure);
            }

            // RetryNeeded is retryable regardless of how its message would
            // classify, so give the fallback query a retryable category.
            let category = last_failure
                .category()
                .filter(ErrorCategory::is_retryable)
                .unwrap_or(ErrorCategory::ProviderError);

            match self
                .selector
                .fallback(&action, selection.strategy, category, &ctx.criteria)
                .await
            {
                Some(next) => {
                    self.emit(
                        ctx,
                        ProgressEventKind::ProviderFallback,
                        json!({
                            "stepId": step.id,
                            "from": selection.strategy.as_str(),
                            "to": next.strategy.as_str(),
                            "error": last_failure.error_message(),
                        }),
                    );
                    tracing::debug!(
                        step_id = %step.id,
                        from = %selection.strategy,
                        to = %next.strategy,
                        "step falling back to next strategy"
                    );
                    selection = next;
                }
                None => return self.finalize_failure(step, &selection, last_failure),
            }
        }
    }

    /// Run up to 1 + max_retries attempts on the current provider. Returns
    /// `Finished` for terminal outcomes and `Exhausted` with the last
    /// failure once this provider is out of attempts.
    async fn attempt_on_provider(
        &self,
        step: &mut Step,
        ctx: &ExecContext,
        action: &Action,
        selection: &Selection,
        provider_ctx: &ProviderContext,
    ) -> AttemptOutcome {
        let mut attempt: u32 = 0;
        loop {
            let result = self
                .actions
                .execute(action, selection.provider.as_ref(), provider_ctx)
                .await;

            if result.is_success() {
                return AttemptOutcome::Finished(self.finalize_success(step, selection, result));
            }

            if result.is_retryable() && attempt < self.options.max_retries {
                let delay = self.delay_for_attempt(attempt);
                attempt += 1;
                step.metadata.retry_count += 1;
                self.emit(
                    ctx,
                    ProgressEventKind::StepRetrying,
                    json!({
                        "stepId": step.id,
                        "retryCount": step.metadata.retry_count,
                        "strategy": selection.strategy.as_str(),
                        "error": result.error_message(),
                    }),
                );
                tracing::debug!(
                    step_id = %step.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying step on same provider"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.control.cancellation_token().cancelled() => {
                        let message = "step cancelled during retry delay".to_string();
                        step.mark_failed(message.clone());
                        return AttemptOutcome::Finished(ExecutionResult::failure(
                            message,
                            ErrorCategory::Unknown,
                        ));
                    }
                }
                continue;
            }

            return AttemptOutcome::Exhausted(result);
        }
    }

    /// Delays grow geometrically and never decrease.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.options.backoff_factor.max(1.0);
        self.options
            .retry_delay
            .mul_f64(factor.powi(attempt as i32))
    }

    /// Validate a successful result against the step contract: declared and
    /// expected output shapes produce warnings only; a met failure condition
    /// converts the success into a non-retryable failure.
    fn finalize_success(
        &self,
        step: &mut Step,
        selection: &Selection,
        mut result: ExecutionResult,
    ) -> ExecutionResult {
        step.metadata.provider_used = Some(selection.provider.name().to_string());

        let data = result.data().cloned().unwrap_or_default();

        let mut warnings = Vec::new();
        for (field, shape) in Action::output_shape(step.action.kind()) {
            if data.get(field).is_none() {
                warnings.push(format!("declared output field '{field}' missing from result"));
            } else if !shape.matches(&data[*field]) {
                warnings.push(format!("declared output field '{field}' has unexpected shape"));
            }
        }
        for (field, shape) in &step.expected_output {
            match data.get(field) {
                None => warnings.push(format!("expected field '{field}' missing from result")),
                Some(value) if !shape.matches(value) => warnings.push(format!(
                    "expected field '{field}' does not match shape {shape:?}"
                )),
                _ => {}
            }
        }
        if let ExecutionResult::PartialSuccess { reason, .. } = &result {
            warnings.push(format!("partial success: {reason}"));
        }
        result.meta_mut().warnings.extend(warnings);

        if let Some(condition) = step
            .failure_conditions
            .iter()
            .find(|condition| condition.evaluate(&data))
        {
            let message = format!("failure condition met: {}", condition.describe());
            step.mark_failed(message.clone());
            let mut failure = ExecutionResult::failure(message, ErrorCategory::ValidationError);
            *failure.meta_mut() = result.meta().clone();
            return failure;
        }

        step.mark_success(data);
        result
    }

    fn finalize_failure(
        &self,
        step: &mut Step,
        selection: &Selection,
        result: ExecutionResult,
    ) -> ExecutionResult {
        step.metadata.provider_used = Some(selection.provider.name().to_string());
        step.mark_failed(
            result
                .error_message()
                .unwrap_or("step failed without an error message")
                .to_string(),
        );
        result
    }

    fn emit(&self, ctx: &ExecContext, kind: ProgressEventKind, data: serde_json::Value) {
        let task_id = ctx.task_id.clone().unwrap_or_default();
        self.bus.emit(ProgressEvent::new(kind, task_id, data));
    }
}

enum AttemptOutcome {
    /// Terminal result; the step has been finalized.
    Finished(ExecutionResult),
    /// Attempts on the current provider are exhausted.
    Exhausted(ExecutionResult),
}

fn provider_context_for(step: &Step, ctx: &ExecContext) -> ProviderContext {
    let mut provider_ctx = ProviderContext::new().for_step(step.id.clone());
    provider_ctx.task_id = ctx.task_id.clone();
    provider_ctx.vars = ctx.vars.clone();
    for (key, value) in &step.context {
        provider_ctx.vars.insert(key.clone(), value.clone());
    }
    provider_ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SequentialIdSource;
    use crate::provider::{Capabilities, Health, Provider, ProviderRegistry, Speed};
    use crate::selector::Strategy;
    use crate::types::{ConditionOp, FailureCondition, FieldShape, StepStatus};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider replaying a scripted list of results.
    struct ScriptedProvider {
        name: String,
        caps: Capabilities,
        script: Mutex<Vec<ExecutionResult>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(name: &str, script: Vec<ExecutionResult>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                caps: Capabilities::none()
                    .with_navigation()
                    .with_search()
                    .with_extraction()
                    .with_speed(Speed::Fast),
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> &Capabilities {
            &self.caps
        }

        async fn health_check(&self) -> Health {
            Health::healthy()
        }

        async fn execute(&self, _action: &Action, _ctx: &ProviderContext) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    fn executor_with(registry: Arc<ProviderRegistry>, bus: Arc<ProgressBus>) -> StepExecutor {
        StepExecutor::new(
            Arc::new(StrategySelector::new(registry)),
            Arc::new(ActionExecutor::new(Arc::new(SequentialIdSource::new("a")))),
            bus,
            StepExecutorOptions {
                retry_delay: Duration::from_millis(1),
                ..StepExecutorOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let registry = Arc::new(ProviderRegistry::new());
        let provider = ScriptedProvider::new(
            "api",
            vec![ExecutionResult::success(json!({"text": "$899"}))],
        );
        registry.register(Strategy::Api, provider.clone());
        let executor = executor_with(registry, Arc::new(ProgressBus::new()));

        let mut step = Step::new(Action::extract_text(".price", false));
        let result = executor.execute(&mut step, &ExecContext::new()).await;
        assert!(result.is_success());
        assert_eq!(step.status, StepStatus::Success);
        assert_eq!(step.metadata.retry_count, 0);
        assert_eq!(step.metadata.provider_used.as_deref(), Some("api"));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_retries_then_fallback_across_strategies() {
        let registry = Arc::new(ProviderRegistry::new());
        let api = ScriptedProvider::new(
            "api",
            vec![ExecutionResult::failure(
                "connection refused",
                ErrorCategory::Network,
            )],
        );
        let scraper = ScriptedProvider::new(
            "scraper",
            vec![ExecutionResult::success(
                json!({"url": "https://x", "status": 200, "title": "x"}),
            )],
        );
        registry.register(Strategy::Api, api.clone());
        registry.register(Strategy::Scraper, scraper.clone());

        let bus = Arc::new(ProgressBus::new());
        let executor = executor_with(registry, bus.clone());

        let mut step = Step::new(Action::navigate("https://x"));
        let result = executor.execute(&mut step, &ExecContext::new()).await;

        assert!(result.is_success());
        assert_eq!(api.calls(), 3); // first attempt + 2 retries
        assert_eq!(scraper.calls(), 1);
        assert_eq!(step.metadata.retry_count, 2);
        assert_eq!(step.metadata.provider_used.as_deref(), Some("scraper"));

        let kinds: Vec<_> = bus.recent(10).into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ProgressEventKind::StepRetrying,
                ProgressEventKind::StepRetrying,
                ProgressEventKind::ProviderFallback,
            ]
        );
    }

    #[tokio::test]
    async fn test_non_retryable_error_means_zero_retries_and_zero_fallbacks() {
        let registry = Arc::new(ProviderRegistry::new());
        let api = ScriptedProvider::new(
            "api",
            vec![ExecutionResult::failure(
                "validation failed upstream",
                ErrorCategory::ValidationError,
            )],
        );
        let scraper = ScriptedProvider::new("scraper", vec![ExecutionResult::success(json!({}))]);
        registry.register(Strategy::Api, api.clone());
        registry.register(Strategy::Scraper, scraper.clone());
        let executor = executor_with(registry, Arc::new(ProgressBus::new()));

        let mut step = Step::new(Action::navigate("https://x"));
        let result = executor.execute(&mut step, &ExecContext::new()).await;

        assert!(!result.is_success());
        assert_eq!(api.calls(), 1);
        assert_eq!(scraper.calls(), 0);
        assert_eq!(step.metadata.retry_count, 0);
        assert_eq!(step.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_invalid_step_is_rejected_before_any_provider_call() {
        let registry = Arc::new(ProviderRegistry::new());
        let api = ScriptedProvider::new("api", vec![ExecutionResult::success(json!({}))]);
        registry.register(Strategy::Api, api.clone());
        let executor = executor_with(registry, Arc::new(ProgressBus::new()));

        // Deserialized step with an out-of-schema action: Type without text.
        let mut step = Step::new(Action::type_text("#q", ""));
        let result = executor.execute(&mut step, &ExecContext::new()).await;

        assert_eq!(result.category(), Some(ErrorCategory::ValidationError));
        assert_eq!(api.calls(), 0);
        assert_eq!(step.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_no_strategy_available_fails_without_retry() {
        let registry = Arc::new(ProviderRegistry::new());
        let executor = executor_with(registry, Arc::new(ProgressBus::new()));

        let mut step = Step::new(Action::navigate("https://x"));
        let result = executor.execute(&mut step, &ExecContext::new()).await;

        assert_eq!(result.category(), Some(ErrorCategory::ProviderError));
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.metadata.retry_count, 0);
    }

    #[tokio::test]
    async fn test_failure_condition_converts_success_without_fallback() {
        let registry = Arc::new(ProviderRegistry::new());
        let api = ScriptedProvider::new(
            "api",
            vec![ExecutionResult::success(json!({"text": "Out of stock"}))],
        );
        let scraper = ScriptedProvider::new("scraper", vec![ExecutionResult::success(json!({}))]);
        registry.register(Strategy::Api, api.clone());
        registry.register(Strategy::Scraper, scraper.clone());
        let executor = executor_with(registry, Arc::new(ProgressBus::new()));

        let mut expected = BTreeMap::new();
        expected.insert("text".to_string(), FieldShape::String);
        let mut step = Step::new(Action::extract_text(".availability", false))
            .with_expected_output(expected)
            .with_failure_conditions(vec![FailureCondition::new(
                "text",
                ConditionOp::Equals,
                json!("Out of stock"),
            )]);

        let result = executor.execute(&mut step, &ExecContext::new()).await;

        assert_eq!(result.category(), Some(ErrorCategory::ValidationError));
        assert!(result
            .error_message()
            .unwrap()
            .contains("failure condition met"));
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(api.calls(), 1);
        assert_eq!(scraper.calls(), 0);
    }

    #[tokio::test]
    async fn test_expected_output_mismatch_is_a_warning_only() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(
            Strategy::Api,
            ScriptedProvider::new("api", vec![ExecutionResult::success(json!({"text": 42}))]),
        );
        let executor = executor_with(registry, Arc::new(ProgressBus::new()));

        let mut expected = BTreeMap::new();
        expected.insert("text".to_string(), FieldShape::String);
        expected.insert("currency".to_string(), FieldShape::String);
        let mut step =
            Step::new(Action::extract_text(".price", false)).with_expected_output(expected);

        let result = executor.execute(&mut step, &ExecContext::new()).await;

        assert!(result.is_success());
        assert_eq!(step.status, StepStatus::Success);
        let warnings = &result.meta().warnings;
        assert!(warnings.iter().any(|w| w.contains("currency")));
        assert!(warnings.iter().any(|w| w.contains("'text'")));
    }

    #[tokio::test]
    async fn test_retry_needed_is_retried_regardless_of_message() {
        let registry = Arc::new(ProviderRegistry::new());
        let api = ScriptedProvider::new(
            "api",
            vec![
                ExecutionResult::retry_needed("validation hiccup"),
                ExecutionResult::success(json!({"text": "ok"})),
            ],
        );
        registry.register(Strategy::Api, api.clone());
        let executor = executor_with(registry, Arc::new(ProgressBus::new()));

        let mut step = Step::new(Action::extract_text(".x", false));
        let result = executor.execute(&mut step, &ExecContext::new()).await;

        assert!(result.is_success());
        assert_eq!(api.calls(), 2);
        assert_eq!(step.metadata.retry_count, 1);
    }

    #[tokio::test]
    async fn test_cancellation_short_circuits_retry_sleep() {
        let registry = Arc::new(ProviderRegistry::new());
        let api = ScriptedProvider::new(
            "api",
            vec![ExecutionResult::failure(
                "connection reset by peer",
                ErrorCategory::Network,
            )],
        );
        registry.register(Strategy::Api, api.clone());
        let executor = StepExecutor::new(
            Arc::new(StrategySelector::new(registry)),
            Arc::new(ActionExecutor::new(Arc::new(SequentialIdSource::new("a")))),
            Arc::new(ProgressBus::new()),
            StepExecutorOptions {
                retry_delay: Duration::from_secs(30),
                ..StepExecutorOptions::default()
            },
        );

        let ctx = ExecContext::new();
        ctx.control.cancel();
        let mut step = Step::new(Action::navigate("https://x"));
        let result = executor.execute(&mut step, &ctx).await;

        assert!(!result.is_success());
        assert_eq!(api.calls(), 1);
        assert!(result.error_message().unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_step_timeout_returns_timeout_result() {
        struct SlowProvider {
            caps: Capabilities,
        }

        #[async_trait]
        impl Provider for SlowProvider {
            fn name(&self) -> &str {
                "slow"
            }

            fn capabilities(&self) -> &Capabilities {
                &self.caps
            }

            async fn health_check(&self) -> Health {
                Health::healthy()
            }

            async fn execute(&self, _action: &Action, _ctx: &ProviderContext) -> ExecutionResult {
                tokio::time::sleep(Duration::from_secs(60)).await;
                ExecutionResult::success(Value::Null)
            }
        }

        let registry = Arc::new(ProviderRegistry::new());
        registry.register(
            Strategy::Api,
            Arc::new(SlowProvider {
                caps: Capabilities::none().with_navigation(),
            }),
        );
        let executor = StepExecutor::new(
            Arc::new(StrategySelector::new(registry)),
            Arc::new(ActionExecutor::new(Arc::new(SequentialIdSource::new("a")))),
            Arc::new(ProgressBus::new()),
            StepExecutorOptions {
                step_timeout: Some(Duration::from_millis(20)),
                ..StepExecutorOptions::default()
            },
        );

        let mut step = Step::new(Action::navigate("https://x"));
        let result = executor.execute(&mut step, &ExecContext::new()).await;

        assert!(matches!(result, ExecutionResult::Timeout { .. }));
        assert_eq!(step.status, StepStatus::Failed);
    }
}
