//! # Webrunner Config
//!
//! Single-file configuration for the webrunner engine. One `webrunner.yaml`
//! configures executor retry policy, dynamic-loop budgets, the event bus,
//! the oracle backend, and provider endpoints. Every field has a default so
//! an empty file is a valid configuration. API keys are resolved from the
//! environment variable named in the config, never stored in it.

mod loader;

pub use loader::{load_config, ConfigError};

use serde::Deserialize;

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebrunnerConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub dynamic: DynamicConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Step/task executor knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// 0 disables the step wall-clock budget.
    #[serde(default)]
    pub step_timeout_ms: u64,
    #[serde(default)]
    pub continue_on_step_failure: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff_factor: default_backoff_factor(),
            step_timeout_ms: 0,
            continue_on_step_failure: false,
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

/// Dynamic-loop budgets.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_dynamic_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cycle_threshold")]
    pub cycle_threshold: u32,
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timeout_secs: default_dynamic_timeout_secs(),
            cycle_threshold: default_cycle_threshold(),
        }
    }
}

fn default_max_iterations() -> u32 {
    15
}

fn default_dynamic_timeout_secs() -> u64 {
    120
}

fn default_cycle_threshold() -> u32 {
    3
}

/// Event bus knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
        }
    }
}

fn default_history_capacity() -> usize {
    100
}

/// Oracle backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OracleConfig {
    #[serde(default = "default_oracle_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_oracle_model")]
    pub model: String,
    #[serde(default = "default_oracle_temperature")]
    pub temperature: f32,
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: default_oracle_endpoint(),
            model: default_oracle_model(),
            temperature: default_oracle_temperature(),
            timeout_secs: default_oracle_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl OracleConfig {
    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

fn default_oracle_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_oracle_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_oracle_temperature() -> f32 {
    0.2
}

fn default_oracle_timeout_secs() -> u64 {
    30
}

fn default_api_key_env() -> String {
    "WEBRUNNER_ORACLE_API_KEY".to_string()
}

/// Provider endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub api: HttpProviderConfig,
    #[serde(default)]
    pub scraper: HttpProviderConfig,
}

/// Settings shared by the HTTP-reachable providers.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpProviderConfig {
    #[serde(default = "default_search_url_template")]
    pub search_url_template: String,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            search_url_template: default_search_url_template(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

fn default_search_url_template() -> String {
    "https://duckduckgo.com/html/?q={query}".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config: WebrunnerConfig = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(config.executor.max_retries, 2);
        assert_eq!(config.executor.retry_delay_ms, 1_000);
        assert_eq!(config.dynamic.max_iterations, 15);
        assert_eq!(config.dynamic.cycle_threshold, 3);
        assert_eq!(config.bus.history_capacity, 100);
    }

    #[test]
    fn test_partial_override() {
        let config: WebrunnerConfig = serde_yaml::from_str(
            "executor:\n  max_retries: 5\ndynamic:\n  cycle_threshold: 4\n",
        )
        .expect("parse");
        assert_eq!(config.executor.max_retries, 5);
        assert_eq!(config.executor.retry_delay_ms, 1_000);
        assert_eq!(config.dynamic.cycle_threshold, 4);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = serde_yaml::from_str::<WebrunnerConfig>("executor:\n  retries: 5\n")
            .expect_err("unknown field");
        assert!(err.to_string().contains("retries"));
    }
}
