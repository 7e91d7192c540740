//! API-strategy provider: fast plain-HTTP fetching without a DOM.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use url::Url;

use webrunner_core::page::{select_attr_values, select_texts};
use webrunner_core::provider::{
    Capabilities, Health, Provider, ProviderContext, Reliability, Speed,
};
use webrunner_core::types::{Action, ErrorCategory, ExecutionResult};

use crate::fetch::{build_client, fetch, FetchedPage, PageSlot};

/// API provider configuration.
#[derive(Debug, Clone)]
pub struct ApiProviderConfig {
    /// Query-URL template for Search; `{query}` is replaced with the
    /// URL-encoded query.
    pub search_url_template: String,
    pub timeout: Duration,
}

impl Default for ApiProviderConfig {
    fn default() -> Self {
        Self {
            search_url_template: "https://duckduckgo.com/html/?q={query}".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Provider for the Api strategy: direct HTTP requests, no JavaScript, no
/// interaction.
pub struct ApiProvider {
    config: ApiProviderConfig,
    client: reqwest::Client,
    caps: Capabilities,
    page: PageSlot,
}

impl ApiProvider {
    /// Create a provider with the given configuration.
    pub fn new(config: ApiProviderConfig) -> Result<Self, reqwest::Error> {
        let client = build_client(config.timeout)?;
        Ok(Self {
            config,
            client,
            caps: Capabilities::none()
                .with_navigation()
                .with_search()
                .with_extraction()
                .with_speed(Speed::Fast)
                .with_reliability(Reliability::Medium),
            page: PageSlot::default(),
        })
    }

    async fn navigate(&self, url: &str) -> ExecutionResult {
        match fetch(&self.client, url).await {
            Ok(page) => {
                let data = json!({
                    "url": page.url,
                    "status": page.status,
                    "title": first_text(&page.body, "title"),
                    "html": page.body,
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
        if Url::parse(&url).is_err() {
            return ExecutionResult::failure(
                format!("invalid search url '{url}'"),
                ErrorCategory::InvalidInput,
            );
        }
        match fetch(&self.client, &url).await {
            Ok(page) => {
                let results = search_results(&page);
                let data = json!({
                    "url": page.url,
                    "results": results,
                    "html": page.body,
                });
                self.page.store(page).await;
                ExecutionResult::success(data)
            }
            Err(failure) => failure,
        }
    }

    async fn extract_text(&self, selector: &str, multiple: bool) -> ExecutionResult {
        let Some(page) = self.page.current().await else {
            return no_page_loaded();
        };
        let texts = select_texts(&page.body, selector, multiple);
        if texts.is_empty() {
            return selector_miss(selector, &page.url);
        }
        let text = if multiple {
            json!(texts)
        } else {
            json!(texts[0])
        };
        ExecutionResult::success(json!({"text": text, "selector": selector}))
    }

    async fn extract_attribute(
        &self,
        selector: &str,
        attribute: &str,
        multiple: bool,
    ) -> ExecutionResult {
        let Some(page) = self.page.current().await else {
            return no_page_loaded();
        };
        let values = select_attr_values(&page.body, selector, attribute, multiple);
        if values.is_empty() {
            return selector_miss(selector, &page.url);
        }
        let value = if multiple {
            json!(values)
        } else {
            json!(values[0])
        };
        ExecutionResult::success(json!({"value": value, "selector": selector, "attribute": attribute}))
    }
}

#[async_trait]
impl Provider for ApiProvider {
    fn name(&self) -> &str {
        "api"
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
            Action::ExtractText(p) => self.extract_text(&p.selector, p.multiple).await,
            Action::ExtractAttribute(p) => {
                self.extract_attribute(&p.selector, &p.attribute, p.multiple)
                    .await
            }
            Action::Wait(p) => {
                tokio::time::sleep(Duration::from_millis(p.duration_ms)).await;
                ExecutionResult::success(json!({"waitedMs": p.duration_ms}))
            }
            Action::Click(_) | Action::Type(_) => ExecutionResult::failure(
                format!("api provider cannot perform '{}'", action.kind()),
                ErrorCategory::InvalidInput,
            ),
        }
    }
}

pub(crate) fn first_text(html: &str, selector: &str) -> String {
    select_texts(html, selector, false)
        .into_iter()
        .next()
        .unwrap_or_default()
}

pub(crate) fn search_results(page: &FetchedPage) -> Vec<serde_json::Value> {
    let hrefs = select_attr_values(&page.body, "a", "href", true);
    let texts = select_texts(&page.body, "a", true);
    hrefs
        .into_iter()
        .zip(texts.into_iter().chain(std::iter::repeat(String::new())))
        .filter(|(href, _)| href.starts_with("http"))
        .take(20)
        .map(|(href, text)| json!({"href": href, "text": text}))
        .collect()
}

pub(crate) fn no_page_loaded() -> ExecutionResult {
    ExecutionResult::failure(
        "no page loaded: navigate or search before extracting",
        ErrorCategory::InvalidInput,
    )
}

pub(crate) fn selector_miss(selector: &str, url: &str) -> ExecutionResult {
    ExecutionResult::failure(
        format!("no element matches selector '{selector}' on {url}"),
        ErrorCategory::SelectorNotFound,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extraction_without_navigation_is_invalid_input() {
        let provider = ApiProvider::new(ApiProviderConfig::default()).expect("provider");
        let result = provider
            .execute(&Action::extract_text(".price", false), &ProviderContext::new())
            .await;
        assert_eq!(result.category(), Some(ErrorCategory::InvalidInput));
    }

    #[tokio::test]
    async fn test_extraction_reads_from_stored_page() {
        let provider = ApiProvider::new(ApiProviderConfig::default()).expect("provider");
        provider
            .page
            .store(FetchedPage {
                url: "https://shop.example/x".to_string(),
                status: 200,
                body: r#"<div class="price">$899</div><div class="price">$999</div>"#.to_string(),
            })
            .await;

        let result = provider
            .execute(&Action::extract_text(".price", true), &ProviderContext::new())
            .await;
        let data = result.data().expect("data");
        assert_eq!(data["text"], json!(["$899", "$999"]));

        let result = provider
            .execute(
                &Action::extract_text(".missing", false),
                &ProviderContext::new(),
            )
            .await;
        assert_eq!(result.category(), Some(ErrorCategory::SelectorNotFound));
    }

    #[tokio::test]
    async fn test_interaction_is_refused() {
        let provider = ApiProvider::new(ApiProviderConfig::default()).expect("provider");
        assert!(!provider.can_handle(&Action::click("#buy")));
        let result = provider
            .execute(&Action::click("#buy"), &ProviderContext::new())
            .await;
        assert_eq!(result.category(), Some(ErrorCategory::InvalidInput));
    }

    #[tokio::test]
    async fn test_wait_reports_duration() {
        let provider = ApiProvider::new(ApiProviderConfig::default()).expect("provider");
        let result = provider
            .execute(&Action::wait(1), &ProviderContext::new())
            .await;
        assert_eq!(result.data().expect("data")["waitedMs"], 1);
    }
}
