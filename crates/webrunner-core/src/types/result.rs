//! ExecutionResult type definitions
//!
//! Every provider call is normalized into a tagged [`ExecutionResult`].
//! Retryability is a property of the error category, with one exception:
//! a provider returning `RetryNeeded` is retryable regardless of category.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::ActionKind;

/// Closed error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    SelectorNotFound,
    Timeout,
    InvalidInput,
    ProviderError,
    ValidationError,
    Unknown,
}

impl ErrorCategory {
    /// Whether errors of this category may be re-attempted.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::ProviderError
                | ErrorCategory::SelectorNotFound
        )
    }

    /// Classify an error message by keyword when the provider did not
    /// declare a category itself.
    pub fn classify(message: &str) -> Self {
        let msg = message.to_ascii_lowercase();
        const TABLES: &[(ErrorCategory, &[&str])] = &[
            (
                ErrorCategory::Timeout,
                &["timed out", "timeout", "deadline exceeded"],
            ),
            (
                ErrorCategory::Network,
                &[
                    "network",
                    "connection",
                    "dns",
                    "refused",
                    "unreachable",
                    "reset by peer",
                    "broken pipe",
                ],
            ),
            (
                ErrorCategory::SelectorNotFound,
                &["selector", "no element", "no match", "not found on page"],
            ),
            (
                ErrorCategory::ValidationError,
                &["validation", "schema"],
            ),
            (
                ErrorCategory::InvalidInput,
                &["invalid", "missing parameter", "malformed", "unsupported"],
            ),
            (
                ErrorCategory::ProviderError,
                &["provider", "upstream", "service unavailable", "internal error"],
            ),
        ];
        for (category, keywords) in TABLES {
            if keywords.iter().any(|kw| msg.contains(kw)) {
                return *category;
            }
        }
        ErrorCategory::Unknown
    }
}

/// Metadata stamped on every result by the action executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_kind: Option<ActionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Non-fatal findings recorded during result validation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Tagged outcome of one action execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// Execution succeeded; `data` matches the action's output shape.
    Success {
        data: Value,
        #[serde(default)]
        meta: ResultMeta,
    },

    /// Execution produced usable data, with a caveat.
    PartialSuccess {
        data: Value,
        reason: String,
        #[serde(default)]
        meta: ResultMeta,
    },

    /// Execution failed with a classified error.
    Failure {
        error: String,
        category: ErrorCategory,
        #[serde(default)]
        meta: ResultMeta,
    },

    /// Execution exceeded its time budget.
    Timeout {
        elapsed_ms: u64,
        #[serde(default)]
        meta: ResultMeta,
    },

    /// Provider asks for a re-attempt regardless of error category.
    RetryNeeded {
        error: String,
        #[serde(default)]
        meta: ResultMeta,
    },
}

impl ExecutionResult {
    /// Convenience: success with data.
    pub fn success(data: Value) -> Self {
        Self::Success {
            data,
            meta: ResultMeta::default(),
        }
    }

    /// Convenience: partial success with a reason.
    pub fn partial(data: Value, reason: impl Into<String>) -> Self {
        Self::PartialSuccess {
            data,
            reason: reason.into(),
            meta: ResultMeta::default(),
        }
    }

    /// Convenience: failure with an explicit category.
    pub fn failure(error: impl Into<String>, category: ErrorCategory) -> Self {
        Self::Failure {
            error: error.into(),
            category,
            meta: ResultMeta::default(),
        }
    }

    /// Convenience: failure classified from the message.
    pub fn failure_classified(error: impl Into<String>) -> Self {
        let error = error.into();
        let category = ErrorCategory::classify(&error);
        Self::Failure {
            error,
            category,
            meta: ResultMeta::default(),
        }
    }

    /// Convenience: timeout after the given wall-clock duration.
    pub fn timeout(elapsed_ms: u64) -> Self {
        Self::Timeout {
            elapsed_ms,
            meta: ResultMeta::default(),
        }
    }

    /// Convenience: explicit retry request.
    pub fn retry_needed(error: impl Into<String>) -> Self {
        Self::RetryNeeded {
            error: error.into(),
            meta: ResultMeta::default(),
        }
    }

    /// True for Success and PartialSuccess.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Success { .. } | Self::PartialSuccess { .. }
        )
    }

    /// Whether this outcome permits re-attempting the same action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Success { .. } | Self::PartialSuccess { .. } => false,
            Self::Failure { category, .. } => category.is_retryable(),
            Self::Timeout { .. } => true,
            Self::RetryNeeded { .. } => true,
        }
    }

    /// Result data, when the outcome carries any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success { data, .. } | Self::PartialSuccess { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Error message, when the outcome carries one.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Failure { error, .. } | Self::RetryNeeded { error, .. } => Some(error),
            Self::Timeout { .. } => Some("execution timed out"),
            _ => None,
        }
    }

    /// Error category of a non-success outcome.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Failure { category, .. } => Some(*category),
            Self::Timeout { .. } => Some(ErrorCategory::Timeout),
            Self::RetryNeeded { error, .. } => Some(ErrorCategory::classify(error)),
            _ => None,
        }
    }

    /// Stamped metadata.
    pub fn meta(&self) -> &ResultMeta {
        match self {
            Self::Success { meta, .. }
            | Self::PartialSuccess { meta, .. }
            | Self::Failure { meta, .. }
            | Self::Timeout { meta, .. }
            | Self::RetryNeeded { meta, .. } => meta,
        }
    }

    /// Mutable access to the stamped metadata.
    pub fn meta_mut(&mut self) -> &mut ResultMeta {
        match self {
            Self::Success { meta, .. }
            | Self::PartialSuccess { meta, .. }
            | Self::Failure { meta, .. }
            | Self::Timeout { meta, .. }
            | Self::RetryNeeded { meta, .. } => meta,
        }
    }

    /// Reserved side channel: a step result may carry an `inputRequest`
    /// record asking the caller for human input.
    pub fn input_request(&self) -> Option<super::task::InputRequest> {
        let data = self.data()?;
        let raw = data.get("inputRequest")?;
        serde_json::from_value(raw.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retryability_follows_category() {
        assert!(ExecutionResult::failure("boom", ErrorCategory::Network).is_retryable());
        assert!(ExecutionResult::failure("boom", ErrorCategory::Timeout).is_retryable());
        assert!(ExecutionResult::failure("boom", ErrorCategory::ProviderError).is_retryable());
        assert!(
            ExecutionResult::failure("boom", ErrorCategory::SelectorNotFound).is_retryable()
        );
        assert!(!ExecutionResult::failure("boom", ErrorCategory::InvalidInput).is_retryable());
        assert!(
            !ExecutionResult::failure("boom", ErrorCategory::ValidationError).is_retryable()
        );
        assert!(!ExecutionResult::failure("boom", ErrorCategory::Unknown).is_retryable());
    }

    #[test]
    fn test_retry_needed_is_retryable_regardless_of_category() {
        let result = ExecutionResult::retry_needed("validation hiccup");
        assert!(result.is_retryable());
    }

    #[test]
    fn test_classify_uses_keyword_tables() {
        assert_eq!(
            ErrorCategory::classify("connection refused by host"),
            ErrorCategory::Network
        );
        assert_eq!(
            ErrorCategory::classify("request timed out after 30s"),
            ErrorCategory::Timeout
        );
        assert_eq!(
            ErrorCategory::classify("no element matches .price"),
            ErrorCategory::SelectorNotFound
        );
        assert_eq!(
            ErrorCategory::classify("entirely mysterious"),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn test_result_serde_round_trip() {
        let mut result = ExecutionResult::success(json!({"text": "$899"}));
        result.meta_mut().provider = Some("api".to_string());
        result.meta_mut().duration_ms = Some(12);
        let raw = serde_json::to_value(&result).expect("serialize");
        assert_eq!(raw["outcome"], "success");
        let back: ExecutionResult = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(back, result);
    }

    #[test]
    fn test_input_request_side_channel() {
        let result = ExecutionResult::success(json!({
            "inputRequest": {"prompt": "enter 2fa code"}
        }));
        let request = result.input_request().expect("input request");
        assert_eq!(request.prompt, "enter 2fa code");
    }
}
