//! # Webrunner Providers
//!
//! Provider implementations for the two HTTP-reachable strategies:
//!
//! - [`ApiProvider`]: fast plain-HTTP fetcher for the Api strategy
//! - [`ScraperProvider`]: HTML-aware fetcher for the Scraper strategy
//!
//! Both keep the last fetched document behind a mutex so extraction actions
//! operate on the current page; access is serialized internally as the
//! provider contract requires. The Browser strategy is an integration
//! point: a CDP-backed provider implements the same trait elsewhere.

mod fetch;

mod api;
mod scraper;

pub use api::{ApiProvider, ApiProviderConfig};
pub use scraper::{ScraperProvider, ScraperProviderConfig};
