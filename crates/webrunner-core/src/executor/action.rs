//! Action executor
//!
//! One validated action against one provider, with the raw provider result
//! normalized and stamped with execution metadata. This is the boundary
//! where provider errors stop propagating as anything but a classified
//! [`ExecutionResult`].

use std::sync::Arc;
use std::time::Instant;

use crate::id::IdSource;
use crate::provider::{Provider, ProviderContext};
use crate::types::{Action, ErrorCategory, ExecutionResult};

/// Executes a single action against a single provider.
pub struct ActionExecutor {
    ids: Arc<dyn IdSource>,
}

impl ActionExecutor {
    /// Create an executor stamping ids from the given source.
    pub fn new(ids: Arc<dyn IdSource>) -> Self {
        Self { ids }
    }

    /// Execute one action. Order of operations: validate the action, confirm
    /// the provider can handle it, call the provider, normalize, stamp
    /// metadata.
    pub async fn execute(
        &self,
        action: &Action,
        provider: &dyn Provider,
        ctx: &ProviderContext,
    ) -> ExecutionResult {
        let started = Instant::now();

        let mut result = if let Err(err) = action.validate() {
            ExecutionResult::failure(err.to_string(), ErrorCategory::ValidationError)
        } else if !provider.can_handle(action) {
            ExecutionResult::failure(
                format!(
                    "provider '{}' cannot handle action '{}'",
                    provider.name(),
                    action.kind()
                ),
                ErrorCategory::InvalidInput,
            )
        } else {
            normalize(provider.execute(action, ctx).await)
        };

        let meta = result.meta_mut();
        meta.action_id = Some(self.ids.next_id());
        meta.action_kind = Some(action.kind());
        meta.provider = Some(provider.name().to_string());
        meta.duration_ms = Some(started.elapsed().as_millis() as u64);
        let duration_ms = meta.duration_ms;

        tracing::debug!(
            action = %action.kind(),
            provider = provider.name(),
            duration_ms = duration_ms,
            success = result.is_success(),
            "action executed"
        );

        result
    }
}

/// Re-classify failures whose category the provider left as Unknown; the
/// original message is preserved untouched.
fn normalize(result: ExecutionResult) -> ExecutionResult {
    match result {
        ExecutionResult::Failure {
            error,
            category: ErrorCategory::Unknown,
            meta,
        } => {
            let category = ErrorCategory::classify(&error);
            ExecutionResult::Failure {
                error,
                category,
                meta,
            }
        }
        other => other,
    }
}
