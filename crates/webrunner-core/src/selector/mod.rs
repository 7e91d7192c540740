//! Strategy selection module
//!
//! The selector picks a provider for an action and chooses fallbacks after
//! retryable errors. It is stateless: every decision depends only on its
//! inputs plus a registry snapshot read at call time.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::{Provider, ProviderRegistry, Speed};
use crate::types::{Action, ActionKind, ErrorCategory};

/// Execution strategy tag. The declaration order is the fixed default
/// priority: Api before Scraper before Browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Api,
    Scraper,
    Browser,
}

impl Strategy {
    /// Default priority order, highest priority first.
    pub const PRIORITY: [Strategy; 3] = [Strategy::Api, Strategy::Scraper, Strategy::Browser];

    /// Stable wire name of this strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Api => "api",
            Strategy::Scraper => "scraper",
            Strategy::Browser => "browser",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-selection criteria. Hard requirements remove candidates; the
/// preferred speed is a soft hint only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionCriteria {
    #[serde(default)]
    pub requires_javascript: bool,
    #[serde(default)]
    pub requires_interaction: bool,
    #[serde(default)]
    pub requires_file_upload: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_speed: Option<Speed>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_strategies: Vec<Strategy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub force_strategies: Vec<Strategy>,
}

impl SelectionCriteria {
    /// Criteria with no constraints.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requiring_javascript(mut self) -> Self {
        self.requires_javascript = true;
        self
    }

    pub fn requiring_interaction(mut self) -> Self {
        self.requires_interaction = true;
        self
    }

    pub fn preferring_speed(mut self, speed: Speed) -> Self {
        self.preferred_speed = Some(speed);
        self
    }

    pub fn excluding(mut self, strategy: Strategy) -> Self {
        self.exclude_strategies.push(strategy);
        self
    }

    pub fn forcing(mut self, strategy: Strategy) -> Self {
        self.force_strategies.push(strategy);
        self
    }
}

/// Selection failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no strategy available for action '{action}'")]
    NoStrategyAvailable { action: ActionKind },
}

/// A chosen strategy together with its provider.
#[derive(Clone)]
pub struct Selection {
    pub strategy: Strategy,
    pub provider: Arc<dyn Provider>,
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("strategy", &self.strategy)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// Stateless strategy selector over a shared registry.
pub struct StrategySelector {
    registry: Arc<ProviderRegistry>,
}

impl StrategySelector {
    /// Create a selector reading from the given registry.
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Pick a provider for the action. Candidates are visited in priority
    /// order (restricted to `force_strategies` when non-empty), skipping
    /// excluded, unregistered, unhealthy, and capability-contradicting
    /// strategies. Among survivors the preferred speed picks a match if one
    /// exists; otherwise the first survivor wins.
    pub async fn select(
        &self,
        action: &Action,
        criteria: &SelectionCriteria,
    ) -> Result<Selection, SelectError> {
        let mut survivors: Vec<Selection> = Vec::new();

        for strategy in Strategy::PRIORITY {
            if !criteria.force_strategies.is_empty()
                && !criteria.force_strategies.contains(&strategy)
            {
                continue;
            }
            if criteria.exclude_strategies.contains(&strategy) {
                continue;
            }
            let Some(provider) = self.registry.get(strategy) else {
                continue;
            };
            if !self.satisfies_hard_requirements(provider.as_ref(), criteria) {
                tracing::debug!(
                    strategy = %strategy,
                    provider = provider.name(),
                    "strategy skipped: capabilities contradict hard requirements"
                );
                continue;
            }
            if !provider.can_handle(action) {
                continue;
            }
            if !provider.health_check().await.healthy {
                tracing::debug!(
                    strategy = %strategy,
                    provider = provider.name(),
                    "strategy skipped: provider unhealthy"
                );
                continue;
            }
            survivors.push(Selection { strategy, provider });
        }

        if let Some(preferred) = criteria.preferred_speed {
            if let Some(selection) = survivors
                .iter()
                .find(|s| s.provider.capabilities().speed == preferred)
            {
                return Ok(selection.clone());
            }
        }

        survivors
            .into_iter()
            .next()
            .ok_or(SelectError::NoStrategyAvailable {
                action: action.kind(),
            })
    }

    /// Choose a fallback after a failed attempt. Non-retryable errors get no
    /// fallback. Otherwise the priority order is advanced past the current
    /// strategy, skipping excluded, unregistered, unhealthy, and incapable
    /// providers; each strategy is visited at most once.
    pub async fn fallback(
        &self,
        action: &Action,
        current: Strategy,
        category: ErrorCategory,
        criteria: &SelectionCriteria,
    ) -> Option<Selection> {
        if !category.is_retryable() {
            return None;
        }

        let position = Strategy::PRIORITY.iter().position(|s| *s == current)?;
        for strategy in Strategy::PRIORITY.into_iter().skip(position + 1) {
            if criteria.exclude_strategies.contains(&strategy) {
                continue;
            }
            let Some(provider) = self.registry.get(strategy) else {
                continue;
            };
            if !provider.can_handle(action) {
                continue;
            }
            if !provider.health_check().await.healthy {
                continue;
            }
            tracing::debug!(
                from = %current,
                to = %strategy,
                provider = provider.name(),
                "fallback strategy selected"
            );
            return Some(Selection { strategy, provider });
        }
        None
    }

    fn satisfies_hard_requirements(
        &self,
        provider: &dyn Provider,
        criteria: &SelectionCriteria,
    ) -> bool {
        let caps = provider.capabilities();
        if criteria.requires_interaction && !caps.supports_interaction {
            return false;
        }
        if criteria.requires_file_upload && !caps.supports_file_upload {
            return false;
        }
        if criteria.requires_javascript && !caps.requires_javascript {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Capabilities, Health, ProviderContext, Reliability};
    use crate::types::ExecutionResult;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubProvider {
        name: String,
        caps: Capabilities,
        healthy: AtomicBool,
    }

    impl StubProvider {
        fn new(name: &str, caps: Capabilities) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                caps,
                healthy: AtomicBool::new(true),
            })
        }

        fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> &Capabilities {
            &self.caps
        }

        async fn health_check(&self) -> Health {
            if self.healthy.load(Ordering::SeqCst) {
                Health::healthy()
            } else {
                Health::unhealthy("down for maintenance")
            }
        }

        async fn execute(&self, _action: &Action, _ctx: &ProviderContext) -> ExecutionResult {
            ExecutionResult::success(json!({}))
        }
    }

    fn api_caps() -> Capabilities {
        Capabilities::none()
            .with_navigation()
            .with_search()
            .with_extraction()
            .with_speed(Speed::Fast)
    }

    fn browser_caps() -> Capabilities {
        Capabilities::none()
            .with_navigation()
            .with_search()
            .with_extraction()
            .with_interaction()
            .with_javascript()
            .with_speed(Speed::Slow)
            .with_reliability(Reliability::High)
    }

    fn registry_with_all() -> (Arc<ProviderRegistry>, Arc<StubProvider>, Arc<StubProvider>) {
        let registry = Arc::new(ProviderRegistry::new());
        let api = StubProvider::new("api", api_caps());
        let scraper = StubProvider::new("scraper", api_caps());
        registry.register(Strategy::Api, api.clone());
        registry.register(Strategy::Scraper, scraper.clone());
        registry.register(Strategy::Browser, StubProvider::new("browser", browser_caps()));
        (registry, api, scraper)
    }

    #[tokio::test]
    async fn test_select_follows_priority_order() {
        let (registry, _, _) = registry_with_all();
        let selector = StrategySelector::new(registry);
        let selection = selector
            .select(&Action::navigate("https://x"), &SelectionCriteria::new())
            .await
            .expect("selection");
        assert_eq!(selection.strategy, Strategy::Api);
    }

    #[tokio::test]
    async fn test_select_skips_unhealthy_and_excluded() {
        let (registry, api, _) = registry_with_all();
        api.set_healthy(false);
        let selector = StrategySelector::new(registry);
        let criteria = SelectionCriteria::new().excluding(Strategy::Scraper);
        let selection = selector
            .select(&Action::navigate("https://x"), &criteria)
            .await
            .expect("selection");
        assert_eq!(selection.strategy, Strategy::Browser);
    }

    #[tokio::test]
    async fn test_interaction_requirement_eliminates_api_and_scraper() {
        let (registry, _, _) = registry_with_all();
        let selector = StrategySelector::new(registry);
        let criteria = SelectionCriteria::new().requiring_interaction();
        let selection = selector
            .select(&Action::click("#buy"), &criteria)
            .await
            .expect("selection");
        assert_eq!(selection.strategy, Strategy::Browser);
    }

    #[tokio::test]
    async fn test_force_strategies_restricts_candidates() {
        let (registry, _, _) = registry_with_all();
        let selector = StrategySelector::new(registry);
        let criteria = SelectionCriteria::new().forcing(Strategy::Scraper);
        let selection = selector
            .select(&Action::navigate("https://x"), &criteria)
            .await
            .expect("selection");
        assert_eq!(selection.strategy, Strategy::Scraper);
    }

    #[tokio::test]
    async fn test_preferred_speed_is_soft() {
        let (registry, _, _) = registry_with_all();
        let selector = StrategySelector::new(registry);
        // Browser is the only slow provider; preferring slow picks it even
        // though api has priority.
        let criteria = SelectionCriteria::new().preferring_speed(Speed::Slow);
        let selection = selector
            .select(&Action::navigate("https://x"), &criteria)
            .await
            .expect("selection");
        assert_eq!(selection.strategy, Strategy::Browser);

        // A preference nothing matches falls back to priority order.
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Strategy::Api, StubProvider::new("api", api_caps()));
        let selector = StrategySelector::new(registry);
        let criteria = SelectionCriteria::new().preferring_speed(Speed::Slow);
        let selection = selector
            .select(&Action::navigate("https://x"), &criteria)
            .await
            .expect("selection");
        assert_eq!(selection.strategy, Strategy::Api);
    }

    #[tokio::test]
    async fn test_select_fails_when_everything_is_unavailable() {
        let registry = Arc::new(ProviderRegistry::new());
        let selector = StrategySelector::new(registry);
        let err = selector
            .select(&Action::navigate("https://x"), &SelectionCriteria::new())
            .await
            .expect_err("no providers");
        assert_eq!(
            err,
            SelectError::NoStrategyAvailable {
                action: ActionKind::Navigate
            }
        );
    }

    #[tokio::test]
    async fn test_fallback_refuses_non_retryable_errors() {
        let (registry, _, _) = registry_with_all();
        let selector = StrategySelector::new(registry);
        let fallback = selector
            .fallback(
                &Action::navigate("https://x"),
                Strategy::Api,
                ErrorCategory::ValidationError,
                &SelectionCriteria::new(),
            )
            .await;
        assert!(fallback.is_none());
    }

    #[tokio::test]
    async fn test_fallback_advances_past_current_strategy() {
        let (registry, _, scraper) = registry_with_all();
        let selector = StrategySelector::new(registry);
        let fallback = selector
            .fallback(
                &Action::navigate("https://x"),
                Strategy::Api,
                ErrorCategory::Network,
                &SelectionCriteria::new(),
            )
            .await
            .expect("fallback");
        assert_eq!(fallback.strategy, Strategy::Scraper);

        scraper.set_healthy(false);
        let (registry2, _, scraper2) = registry_with_all();
        scraper2.set_healthy(false);
        let selector = StrategySelector::new(registry2);
        let fallback = selector
            .fallback(
                &Action::navigate("https://x"),
                Strategy::Api,
                ErrorCategory::Network,
                &SelectionCriteria::new(),
            )
            .await
            .expect("fallback");
        assert_eq!(fallback.strategy, Strategy::Browser);
    }

    #[tokio::test]
    async fn test_fallback_exhausts_after_last_strategy() {
        let (registry, _, _) = registry_with_all();
        let selector = StrategySelector::new(registry);
        let fallback = selector
            .fallback(
                &Action::navigate("https://x"),
                Strategy::Browser,
                ErrorCategory::Network,
                &SelectionCriteria::new(),
            )
            .await;
        assert!(fallback.is_none());
    }
}
