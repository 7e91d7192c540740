//! Provider abstraction module
//!
//! A Provider is the concrete executor of Actions for one Strategy. It is a
//! black box to the executors: they only see its name, its static capability
//! record, a health probe, and `execute`.

mod registry;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use registry::ProviderRegistry;

use crate::types::{Action, ActionKind, ExecutionResult};

/// Relative execution speed of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speed {
    Fast,
    Medium,
    Slow,
}

/// Relative reliability of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    Low,
    Medium,
    High,
}

/// Static capability record; fixed for the lifetime of a provider instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub supports_navigation: bool,
    pub supports_search: bool,
    pub supports_extraction: bool,
    pub supports_interaction: bool,
    pub supports_pagination: bool,
    pub supports_file_upload: bool,
    /// Whether the provider runs JavaScript (and can therefore handle pages
    /// that require it).
    pub requires_javascript: bool,
    pub speed: Speed,
    pub reliability: Reliability,
}

impl Capabilities {
    /// A conservative baseline: nothing supported, medium speed/reliability.
    pub fn none() -> Self {
        Self {
            supports_navigation: false,
            supports_search: false,
            supports_extraction: false,
            supports_interaction: false,
            supports_pagination: false,
            supports_file_upload: false,
            requires_javascript: false,
            speed: Speed::Medium,
            reliability: Reliability::Medium,
        }
    }

    pub fn with_navigation(mut self) -> Self {
        self.supports_navigation = true;
        self
    }

    pub fn with_search(mut self) -> Self {
        self.supports_search = true;
        self
    }

    pub fn with_extraction(mut self) -> Self {
        self.supports_extraction = true;
        self
    }

    pub fn with_interaction(mut self) -> Self {
        self.supports_interaction = true;
        self
    }

    pub fn with_pagination(mut self) -> Self {
        self.supports_pagination = true;
        self
    }

    pub fn with_file_upload(mut self) -> Self {
        self.supports_file_upload = true;
        self
    }

    pub fn with_javascript(mut self) -> Self {
        self.requires_javascript = true;
        self
    }

    pub fn with_speed(mut self, speed: Speed) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_reliability(mut self, reliability: Reliability) -> Self {
        self.reliability = reliability;
        self
    }

    /// Capability mapping from action kinds:
    /// Navigate/Search need navigation or search, ExtractText/ExtractAttribute
    /// need extraction, Click/Type need interaction, Wait is always handled.
    pub fn supports(&self, kind: ActionKind) -> bool {
        match kind {
            ActionKind::Navigate => self.supports_navigation,
            ActionKind::Search => self.supports_navigation || self.supports_search,
            ActionKind::ExtractText | ActionKind::ExtractAttribute => self.supports_extraction,
            ActionKind::Click | ActionKind::Type => self.supports_interaction,
            ActionKind::Wait => true,
        }
    }
}

/// Outcome of a health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub healthy: bool,
    #[serde(default)]
    pub details: String,
}

impl Health {
    /// A passing probe.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            details: String::new(),
        }
    }

    /// A failing probe with an explanation.
    pub fn unhealthy(details: impl Into<String>) -> Self {
        Self {
            healthy: false,
            details: details.into(),
        }
    }
}

/// Per-call context handed to a provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderContext {
    /// Task this call belongs to, when executing inside one.
    pub task_id: Option<String>,
    /// Step this call belongs to, when executing inside one.
    pub step_id: Option<String>,
    /// Carried key-value context (step context plus caller variables).
    pub vars: BTreeMap<String, Value>,
}

impl ProviderContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the owning task id.
    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Attach the owning step id.
    pub fn for_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }
}

/// Provider trait - concrete executor of Actions for one Strategy.
///
/// Providers must be safe to call from a single caller at a time; ones that
/// carry mutable state (a live page) serialize their own access internally.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique provider name.
    fn name(&self) -> &str;

    /// Static capability record.
    fn capabilities(&self) -> &Capabilities;

    /// Deterministic check derived from the capability mapping.
    fn can_handle(&self, action: &Action) -> bool {
        self.capabilities().supports(action.kind())
    }

    /// Probe provider health within a bounded time.
    async fn health_check(&self) -> Health;

    /// Execute one action.
    async fn execute(&self, action: &Action, ctx: &ProviderContext) -> ExecutionResult;
}
