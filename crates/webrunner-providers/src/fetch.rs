//! Shared HTTP plumbing for the API and Scraper providers.

use std::time::Duration;

use tokio::sync::Mutex;

use webrunner_core::types::{ErrorCategory, ExecutionResult};

pub(crate) const DEFAULT_USER_AGENT: &str = concat!("webrunner/", env!("CARGO_PKG_VERSION"));

/// The document a provider is currently "on".
#[derive(Debug, Clone)]
pub(crate) struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Serialized slot holding the provider's current page.
#[derive(Debug, Default)]
pub(crate) struct PageSlot {
    inner: Mutex<Option<FetchedPage>>,
}

impl PageSlot {
    pub(crate) async fn store(&self, page: FetchedPage) {
        *self.inner.lock().await = Some(page);
    }

    pub(crate) async fn current(&self) -> Option<FetchedPage> {
        self.inner.lock().await.clone()
    }
}

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(DEFAULT_USER_AGENT)
        .build()
}

/// GET a URL and return the final location, status, and body.
pub(crate) async fn fetch(
    client: &reqwest::Client,
    url: &str,
) -> Result<FetchedPage, ExecutionResult> {
    let response = client.get(url).send().await.map_err(request_failure)?;
    let status = response.status();
    let final_url = response.url().to_string();
    let body = response.text().await.map_err(request_failure)?;
    tracing::debug!(url = %final_url, status = status.as_u16(), bytes = body.len(), "page fetched");

    if status.is_server_error() {
        return Err(ExecutionResult::failure(
            format!("upstream returned HTTP {status} for {final_url}"),
            ErrorCategory::ProviderError,
        ));
    }
    if status.is_client_error() {
        return Err(ExecutionResult::failure(
            format!("request rejected with HTTP {status} for {final_url}"),
            ErrorCategory::InvalidInput,
        ));
    }

    Ok(FetchedPage {
        url: final_url,
        status: status.as_u16(),
        body,
    })
}

fn request_failure(err: reqwest::Error) -> ExecutionResult {
    if err.is_timeout() {
        ExecutionResult::failure(format!("request timed out: {err}"), ErrorCategory::Timeout)
    } else if err.is_connect() {
        ExecutionResult::failure(
            format!("connection failed: {err}"),
            ErrorCategory::Network,
        )
    } else {
        ExecutionResult::failure(format!("request failed: {err}"), ErrorCategory::Network)
    }
}
