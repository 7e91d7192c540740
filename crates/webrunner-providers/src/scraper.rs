//! Scraper-strategy provider: HTML-aware fetching with page-state
//! extraction for the oracle.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use webrunner_core::page::{select_attr_values, select_texts, PageStateExtractor};
use webrunner_core::provider::{
    Capabilities, Health, Provider, ProviderContext, Reliability, Speed,
};
use webrunner_core::types::{Action, ErrorCategory, ExecutionResult};

use crate::api::{no_page_loaded, search_results, selector_miss};
use crate::fetch::{build_client, fetch, PageSlot};

/// Scraper provider configuration.
#[derive(Debug, Clone)]
pub struct ScraperProviderConfig {
    /// Query-URL template for Search; `{query}` is replaced with the
    /// URL-encoded query.
    pub search_url_template: String,
    pub timeout: Duration,
}

impl Default for ScraperProviderConfig {
    fn default() -> Self {
        Self {
            search_url_template: "https://duckduckgo.com/html/?q={query}".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Provider for the Scraper strategy: fetches HTML and exposes a structured
/// page state alongside the raw document. No JavaScript, no interaction.
pub struct ScraperProvider {
    config: ScraperProviderConfig,
    client: reqwest::Client,
    caps: Capabilities,
    extractor: PageStateExtractor,
    page: PageSlot,
}

impl ScraperProvider {
    /// Create a provider with the given configuration.
    pub fn new(config: ScraperProviderConfig) -> Result<Self, reqwest::Error> {
        let client = build_client(config.timeout)?;
        Ok(Self {
            config,
            client,
            caps: Capabilities::none()
                .with_navigation()
                .with_search()
                .with_extraction()
                .with_pagination()
                .with_speed(Speed::Medium)
                .with_reliability(Reliability::Medium),
            extractor: PageStateExtractor::new(),
            page: PageSlot::default(),
        })
    }

    async fn navigate(&self, url: &str) -> ExecutionResult {
        match fetch(&self.client, url).await {
            Ok(page) => {
                let state = self.extractor.extract(&page.url, &page.body);
                let data = json!({
                    "url": page.url,
                    "status": page.status,
                    "title": state.title,
                    "html": page.body,
                    "pageState": state,
                });
                self.page.store(page).await;
                ExecutionResult::success(data)
            }
            Err(failure) => failure,
        }
    }

    async fn search(&self, query: &str) -> ExecutionResult {
        let encoded: String =
            url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        let url = self.config.search_url_template.replace("{query}", &encoded);
        match fetch(&self.client, &url).await {
            Ok(page) => {
                let state = self.extractor.extract(&page.url, &page.body);
                let results = search_results(&page);
                let data = json!({
                    "url": page.url,
                    "results": results,
                    "html": page.body,
                    "pageState": state,
                });
                self.page.store(page).await;
                ExecutionResult::success(data)
            }
            Err(failure) => failure,
        }
    }
}

#[async_trait]
impl Provider for ScraperProvider {
    fn name(&self) -> &str {
        "scraper"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    async fn health_check(&self) -> Health {
        Health::healthy()
    }

    async fn execute(&self, action: &Action, _ctx: &ProviderContext) -> ExecutionResult {
        match action {
            Action::Navigate(p) => self.navigate(&p.url).await,
            Action::Search(p) => self.search(&p.query).await,
            Action::ExtractText(p) => {
                let Some(page) = self.page.current().await else {
                    return no_page_loaded();
                };
                let texts = select_texts(&page.body, &p.selector, p.multiple);
                if texts.is_empty() {
                    return selector_miss(&p.selector, &page.url);
                }
                let text = if p.multiple { json!(texts) } else { json!(texts[0]) };
                ExecutionResult::success(json!({"text": text, "selector": p.selector}))
            }
            Action::ExtractAttribute(p) => {
                let Some(page) = self.page.current().await else {
                    return no_page_loaded();
                };
                let values =
                    select_attr_values(&page.body, &p.selector, &p.attribute, p.multiple);
                if values.is_empty() {
                    return selector_miss(&p.selector, &page.url);
                }
                let value = if p.multiple {
                    json!(values)
                } else {
                    json!(values[0])
                };
                ExecutionResult::success(
                    json!({"value": value, "selector": p.selector, "attribute": p.attribute}),
                )
            }
            Action::Wait(p) => {
                tokio::time::sleep(Duration::from_millis(p.duration_ms)).await;
                ExecutionResult::success(json!({"waitedMs": p.duration_ms}))
            }
            Action::Click(_) | Action::Type(_) => ExecutionResult::failure(
                format!("scraper provider cannot perform '{}'", action.kind()),
                ErrorCategory::InvalidInput,
            ),
        }
    }
}
