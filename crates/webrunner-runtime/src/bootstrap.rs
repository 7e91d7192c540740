//! Bootstrap - build a ready-to-run orchestrator from configuration.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use webrunner_config::WebrunnerConfig;
use webrunner_core::bus::ProgressBus;
use webrunner_core::executor::{DynamicOptions, StepExecutorOptions, TaskExecutorOptions};
use webrunner_core::provider::ProviderRegistry;
use webrunner_core::selector::Strategy;
use webrunner_oracle::{HttpLlmClient, HttpLlmClientConfig, LlmOracle, LlmOracleConfig};
use webrunner_providers::{
    ApiProvider, ApiProviderConfig, ScraperProvider, ScraperProviderConfig,
};
use webrunner_stores::{InMemoryHistoryRepository, InMemoryTaskRepository};

use crate::{Orchestrator, OrchestratorOptions};

/// Bootstrap errors.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to build provider: {0}")]
    Provider(String),

    #[error("failed to build oracle client: {0}")]
    Oracle(String),
}

/// Build an orchestrator from configuration: API and Scraper providers, the
/// HTTP LLM oracle, in-memory repositories, and a bus sized per config.
/// Callers with custom collaborators wire [`Orchestrator::new`] directly.
pub fn bootstrap(config: &WebrunnerConfig) -> Result<Orchestrator, BootstrapError> {
    let registry = Arc::new(ProviderRegistry::new());
    registry.register(
        Strategy::Api,
        Arc::new(
            ApiProvider::new(ApiProviderConfig {
                search_url_template: config.providers.api.search_url_template.clone(),
                timeout: Duration::from_secs(config.providers.api.timeout_secs),
            })
            .map_err(|e| BootstrapError::Provider(e.to_string()))?,
        ),
    );
    registry.register(
        Strategy::Scraper,
        Arc::new(
            ScraperProvider::new(ScraperProviderConfig {
                search_url_template: config.providers.scraper.search_url_template.clone(),
                timeout: Duration::from_secs(config.providers.scraper.timeout_secs),
            })
            .map_err(|e| BootstrapError::Provider(e.to_string()))?,
        ),
    );

    let client = HttpLlmClient::new(HttpLlmClientConfig {
        endpoint: config.oracle.endpoint.clone(),
        api_key: config.oracle.api_key(),
        timeout_secs: config.oracle.timeout_secs,
        ..HttpLlmClientConfig::default()
    })
    .map_err(|e| BootstrapError::Oracle(e.to_string()))?;
    let oracle = Arc::new(LlmOracle::new(
        client,
        LlmOracleConfig {
            model: config.oracle.model.clone(),
            temperature: config.oracle.temperature,
        },
    ));

    let options = OrchestratorOptions {
        executor: TaskExecutorOptions {
            continue_on_step_failure: config.executor.continue_on_step_failure,
            step: StepExecutorOptions {
                max_retries: config.executor.max_retries,
                retry_delay: Duration::from_millis(config.executor.retry_delay_ms),
                backoff_factor: config.executor.backoff_factor,
                step_timeout: match config.executor.step_timeout_ms {
                    0 => None,
                    ms => Some(Duration::from_millis(ms)),
                },
            },
        },
        dynamic: DynamicOptions {
            max_iterations: config.dynamic.max_iterations,
            timeout: Duration::from_secs(config.dynamic.timeout_secs),
            cycle_threshold: config.dynamic.cycle_threshold,
        },
        criteria: Default::default(),
    };

    Ok(Orchestrator::new(
        oracle,
        registry,
        Arc::new(ProgressBus::with_capacity(config.bus.history_capacity)),
        Arc::new(InMemoryTaskRepository::new()),
        Arc::new(InMemoryHistoryRepository::new()),
        options,
    ))
}
