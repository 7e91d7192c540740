//! Action type definitions
//!
//! An Action is an atomic, schema-validated web command. The canonical
//! constructor is [`Action::from_params`], which takes a kind plus a raw
//! JSON parameter record and performs total, deterministic validation.
//! An Action that passes construction never fails schema checks later.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The closed set of atomic operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Click,
    Type,
    ExtractText,
    ExtractAttribute,
    Wait,
    Search,
}

impl ActionKind {
    /// All kinds, in declaration order.
    pub const ALL: [ActionKind; 7] = [
        ActionKind::Navigate,
        ActionKind::Click,
        ActionKind::Type,
        ActionKind::ExtractText,
        ActionKind::ExtractAttribute,
        ActionKind::Wait,
        ActionKind::Search,
    ];

    /// Stable wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::ExtractText => "extract_text",
            ActionKind::ExtractAttribute => "extract_attribute",
            ActionKind::Wait => "wait",
            ActionKind::Search => "search",
        }
    }

    /// Parse a wire name back into a kind.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == raw)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page-load milestone a navigation waits for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    #[default]
    Load,
    DomContentLoaded,
    NetworkIdle,
}

impl WaitUntil {
    const ALLOWED: &'static [&'static str] = &["load", "dom_content_loaded", "network_idle"];

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "load" => Some(Self::Load),
            "dom_content_loaded" => Some(Self::DomContentLoaded),
            "network_idle" => Some(Self::NetworkIdle),
            _ => None,
        }
    }
}

/// Declared shape of one output field, used when validating results
/// against a step's expected output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldShape {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldShape {
    /// Whether the given value matches this shape.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldShape::String => value.is_string(),
            FieldShape::Number => value.is_number(),
            FieldShape::Boolean => value.is_boolean(),
            FieldShape::Array => value.is_array(),
            FieldShape::Object => value.is_object(),
            FieldShape::Any => true,
        }
    }
}

/// Validation failure raised by the canonical constructor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("{kind}: parameters must be a JSON object")]
    NotAnObject { kind: ActionKind },

    #[error("{kind}: missing required parameter '{param}'")]
    MissingParam { kind: ActionKind, param: &'static str },

    #[error("{kind}: parameter '{param}' must be a {expected}")]
    InvalidType {
        kind: ActionKind,
        param: &'static str,
        expected: &'static str,
    },

    #[error("{kind}: parameter '{param}' has invalid value '{value}' (allowed: {allowed})")]
    InvalidEnum {
        kind: ActionKind,
        param: &'static str,
        value: String,
        allowed: String,
    },

    #[error("{kind}: unknown parameter '{param}'")]
    UnknownParam { kind: ActionKind, param: String },

    #[error("unknown action kind '{0}'")]
    UnknownKind(String),
}

/// Parameters for [`ActionKind::Navigate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateParams {
    pub url: String,
    #[serde(default)]
    pub wait_until: WaitUntil,
    #[serde(default = "default_navigate_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_navigate_timeout_ms() -> u64 {
    30_000
}

/// Parameters for [`ActionKind::Click`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickParams {
    pub selector: String,
    #[serde(default)]
    pub wait_for_navigation: bool,
}

/// Parameters for [`ActionKind::Type`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeParams {
    pub selector: String,
    pub text: String,
    #[serde(default)]
    pub submit: bool,
}

/// Parameters for [`ActionKind::ExtractText`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractTextParams {
    pub selector: String,
    #[serde(default)]
    pub multiple: bool,
}

/// Parameters for [`ActionKind::ExtractAttribute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractAttributeParams {
    pub selector: String,
    pub attribute: String,
    #[serde(default)]
    pub multiple: bool,
}

/// Parameters for [`ActionKind::Wait`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitParams {
    #[serde(default = "default_wait_duration_ms")]
    pub duration_ms: u64,
}

fn default_wait_duration_ms() -> u64 {
    1_000
}

/// Parameters for [`ActionKind::Search`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
}

const SEARCH_ENGINES: &[&str] = &["default", "google", "bing", "duckduckgo"];

/// Atomic web command, immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "parameters", rename_all = "snake_case")]
pub enum Action {
    Navigate(NavigateParams),
    Click(ClickParams),
    Type(TypeParams),
    ExtractText(ExtractTextParams),
    ExtractAttribute(ExtractAttributeParams),
    Wait(WaitParams),
    Search(SearchParams),
}

impl Action {
    /// Canonical constructor: validate a raw parameter record against the
    /// declared schema for `kind` and build the typed action.
    ///
    /// Checks, in order: the record is an object, no unknown keys, required
    /// parameters present, parameter types, enum values.
    pub fn from_params(kind: ActionKind, params: &Value) -> Result<Self, ActionError> {
        let map = params
            .as_object()
            .ok_or(ActionError::NotAnObject { kind })?;

        reject_unknown_keys(kind, map, allowed_params(kind))?;

        match kind {
            ActionKind::Navigate => {
                let url = require_string(kind, map, "url")?;
                let wait_until = match optional_string(kind, map, "waitUntil")? {
                    Some(raw) => {
                        WaitUntil::parse(&raw).ok_or_else(|| ActionError::InvalidEnum {
                            kind,
                            param: "waitUntil",
                            value: raw,
                            allowed: WaitUntil::ALLOWED.join(", "),
                        })?
                    }
                    None => WaitUntil::default(),
                };
                let timeout_ms =
                    optional_u64(kind, map, "timeoutMs")?.unwrap_or_else(default_navigate_timeout_ms);
                Ok(Action::Navigate(NavigateParams {
                    url,
                    wait_until,
                    timeout_ms,
                }))
            }
            ActionKind::Click => Ok(Action::Click(ClickParams {
                selector: require_string(kind, map, "selector")?,
                wait_for_navigation: optional_bool(kind, map, "waitForNavigation")?
                    .unwrap_or(false),
            })),
            ActionKind::Type => Ok(Action::Type(TypeParams {
                selector: require_string(kind, map, "selector")?,
                text: require_string(kind, map, "text")?,
                submit: optional_bool(kind, map, "submit")?.unwrap_or(false),
            })),
            ActionKind::ExtractText => Ok(Action::ExtractText(ExtractTextParams {
                selector: require_string(kind, map, "selector")?,
                multiple: optional_bool(kind, map, "multiple")?.unwrap_or(false),
            })),
            ActionKind::ExtractAttribute => Ok(Action::ExtractAttribute(ExtractAttributeParams {
                selector: require_string(kind, map, "selector")?,
                attribute: require_string(kind, map, "attribute")?,
                multiple: optional_bool(kind, map, "multiple")?.unwrap_or(false),
            })),
            ActionKind::Wait => Ok(Action::Wait(WaitParams {
                duration_ms: optional_u64(kind, map, "durationMs")?
                    .unwrap_or_else(default_wait_duration_ms),
            })),
            ActionKind::Search => {
                let engine = optional_string(kind, map, "engine")?;
                if let Some(raw) = &engine {
                    if !SEARCH_ENGINES.contains(&raw.as_str()) {
                        return Err(ActionError::InvalidEnum {
                            kind,
                            param: "engine",
                            value: raw.clone(),
                            allowed: SEARCH_ENGINES.join(", "),
                        });
                    }
                }
                Ok(Action::Search(SearchParams {
                    query: require_string(kind, map, "query")?,
                    engine,
                }))
            }
        }
    }

    /// The kind tag of this action.
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Navigate(_) => ActionKind::Navigate,
            Action::Click(_) => ActionKind::Click,
            Action::Type(_) => ActionKind::Type,
            Action::ExtractText(_) => ActionKind::ExtractText,
            Action::ExtractAttribute(_) => ActionKind::ExtractAttribute,
            Action::Wait(_) => ActionKind::Wait,
            Action::Search(_) => ActionKind::Search,
        }
    }

    /// Re-run schema validation on an already-constructed action.
    ///
    /// Construction is the only way to build an Action, so this is total and
    /// succeeds by definition; it exists so callers holding deserialized
    /// actions can assert the invariant cheaply.
    pub fn validate(&self) -> Result<(), ActionError> {
        match self {
            Action::Navigate(p) if p.url.is_empty() => Err(ActionError::MissingParam {
                kind: ActionKind::Navigate,
                param: "url",
            }),
            Action::Click(p) if p.selector.is_empty() => Err(ActionError::MissingParam {
                kind: ActionKind::Click,
                param: "selector",
            }),
            Action::Type(p) if p.selector.is_empty() => Err(ActionError::MissingParam {
                kind: ActionKind::Type,
                param: "selector",
            }),
            Action::Type(p) if p.text.is_empty() => Err(ActionError::MissingParam {
                kind: ActionKind::Type,
                param: "text",
            }),
            Action::ExtractText(p) if p.selector.is_empty() => Err(ActionError::MissingParam {
                kind: ActionKind::ExtractText,
                param: "selector",
            }),
            Action::ExtractAttribute(p) if p.selector.is_empty() => {
                Err(ActionError::MissingParam {
                    kind: ActionKind::ExtractAttribute,
                    param: "selector",
                })
            }
            Action::ExtractAttribute(p) if p.attribute.is_empty() => {
                Err(ActionError::MissingParam {
                    kind: ActionKind::ExtractAttribute,
                    param: "attribute",
                })
            }
            Action::Search(p) if p.query.is_empty() => Err(ActionError::MissingParam {
                kind: ActionKind::Search,
                param: "query",
            }),
            _ => Ok(()),
        }
    }

    /// The declared output record shape for a kind, consumed by the step
    /// executor when validating results.
    pub fn output_shape(kind: ActionKind) -> &'static [(&'static str, FieldShape)] {
        match kind {
            ActionKind::Navigate => &[
                ("url", FieldShape::String),
                ("status", FieldShape::Number),
                ("title", FieldShape::String),
            ],
            ActionKind::Click => &[
                ("clicked", FieldShape::Boolean),
                ("selector", FieldShape::String),
            ],
            ActionKind::Type => &[
                ("typed", FieldShape::Boolean),
                ("selector", FieldShape::String),
            ],
            ActionKind::ExtractText => &[("text", FieldShape::Any)],
            ActionKind::ExtractAttribute => &[("value", FieldShape::Any)],
            ActionKind::Wait => &[("waitedMs", FieldShape::Number)],
            ActionKind::Search => &[
                ("url", FieldShape::String),
                ("results", FieldShape::Array),
            ],
        }
    }

    /// URL targeted by this action, when it has one.
    pub fn target_url(&self) -> Option<&str> {
        match self {
            Action::Navigate(p) => Some(&p.url),
            _ => None,
        }
    }

    // Non-normative convenience constructors.

    /// Build a Navigate action with defaults.
    pub fn navigate(url: impl Into<String>) -> Self {
        Action::Navigate(NavigateParams {
            url: url.into(),
            wait_until: WaitUntil::default(),
            timeout_ms: default_navigate_timeout_ms(),
        })
    }

    /// Build a Click action.
    pub fn click(selector: impl Into<String>) -> Self {
        Action::Click(ClickParams {
            selector: selector.into(),
            wait_for_navigation: false,
        })
    }

    /// Build a Type action.
    pub fn type_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Action::Type(TypeParams {
            selector: selector.into(),
            text: text.into(),
            submit: false,
        })
    }

    /// Build an ExtractText action.
    pub fn extract_text(selector: impl Into<String>, multiple: bool) -> Self {
        Action::ExtractText(ExtractTextParams {
            selector: selector.into(),
            multiple,
        })
    }

    /// Build an ExtractAttribute action.
    pub fn extract_attribute(selector: impl Into<String>, attribute: impl Into<String>) -> Self {
        Action::ExtractAttribute(ExtractAttributeParams {
            selector: selector.into(),
            attribute: attribute.into(),
            multiple: false,
        })
    }

    /// Build a Wait action.
    pub fn wait(duration_ms: u64) -> Self {
        Action::Wait(WaitParams { duration_ms })
    }

    /// Build a Search action.
    pub fn search(query: impl Into<String>) -> Self {
        Action::Search(SearchParams {
            query: query.into(),
            engine: None,
        })
    }
}

fn allowed_params(kind: ActionKind) -> &'static [&'static str] {
    match kind {
        ActionKind::Navigate => &["url", "waitUntil", "timeoutMs"],
        ActionKind::Click => &["selector", "waitForNavigation"],
        ActionKind::Type => &["selector", "text", "submit"],
        ActionKind::ExtractText => &["selector", "multiple"],
        ActionKind::ExtractAttribute => &["selector", "attribute", "multiple"],
        ActionKind::Wait => &["durationMs"],
        ActionKind::Search => &["query", "engine"],
    }
}

fn reject_unknown_keys(
    kind: ActionKind,
    map: &serde_json::Map<String, Value>,
    allowed: &[&str],
) -> Result<(), ActionError> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(ActionError::UnknownParam {
                kind,
                param: key.clone(),
            });
        }
    }
    Ok(())
}

fn require_string(
    kind: ActionKind,
    map: &serde_json::Map<String, Value>,
    param: &'static str,
) -> Result<String, ActionError> {
    match map.get(param) {
        None | Some(Value::Null) => Err(ActionError::MissingParam { kind, param }),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ActionError::InvalidType {
            kind,
            param,
            expected: "string",
        }),
    }
}

fn optional_string(
    kind: ActionKind,
    map: &serde_json::Map<String, Value>,
    param: &'static str,
) -> Result<Option<String>, ActionError> {
    match map.get(param) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ActionError::InvalidType {
            kind,
            param,
            expected: "string",
        }),
    }
}

fn optional_bool(
    kind: ActionKind,
    map: &serde_json::Map<String, Value>,
    param: &'static str,
) -> Result<Option<bool>, ActionError> {
    match map.get(param) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ActionError::InvalidType {
            kind,
            param,
            expected: "boolean",
        }),
    }
}

fn optional_u64(
    kind: ActionKind,
    map: &serde_json::Map<String, Value>,
    param: &'static str,
) -> Result<Option<u64>, ActionError> {
    match map.get(param) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or(ActionError::InvalidType {
            kind,
            param,
            expected: "non-negative integer",
        }),
        Some(_) => Err(ActionError::InvalidType {
            kind,
            param,
            expected: "non-negative integer",
        }),
    }
}

/// Carried context values handed from step to step.
pub type ContextMap = BTreeMap<String, Value>;
