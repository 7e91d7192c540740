//! LLM-backed `AiOracle` implementation.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use webrunner_core::executor::ContextView;
use webrunner_core::oracle::{
    ActionProposal, AiOracle, Decision, OracleError, PlanDraft, PlanningContext, Recovery,
    RecoverySuggestion, SelectorSuggestions,
};
use webrunner_core::types::ActionKind;

use crate::client::{LlmClient, LlmRequest};
use crate::prompts::{
    clip_for_log, decide_system_prompt, decide_user_prompt, plan_system_prompt,
    plan_user_prompt, selectors_system_prompt, selectors_user_prompt, MAX_OUTPUT_LOG_CHARS,
    MAX_PROMPT_LOG_CHARS,
};

/// Oracle configuration.
#[derive(Debug, Clone)]
pub struct LlmOracleConfig {
    pub model: String,
    pub temperature: f32,
}

impl Default for LlmOracleConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
        }
    }
}

/// `AiOracle` implementation over any [`LlmClient`].
pub struct LlmOracle<C: LlmClient> {
    client: C,
    config: LlmOracleConfig,
}

impl<C: LlmClient> LlmOracle<C> {
    pub fn new(client: C, config: LlmOracleConfig) -> Self {
        Self { client, config }
    }

    async fn complete_json(&self, system: String, user: String) -> Result<String, OracleError> {
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                system = %clip_for_log(&system, MAX_PROMPT_LOG_CHARS),
                user = %clip_for_log(&user, MAX_PROMPT_LOG_CHARS),
                "oracle prompts"
            );
        }
        let output = self
            .client
            .complete(LlmRequest {
                system,
                user,
                model: self.config.model.clone(),
                temperature: self.config.temperature,
            })
            .await
            .map_err(|e| OracleError::Backend(e.to_string()))?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                output = %clip_for_log(&output, MAX_OUTPUT_LOG_CHARS),
                "oracle raw output"
            );
        }
        first_json_object(&output)
            .ok_or_else(|| OracleError::InvalidResponse("output contained no JSON object".into()))
    }
}

#[async_trait]
impl<C: LlmClient> AiOracle for LlmOracle<C> {
    async fn generate_plan(
        &self,
        goal: &str,
        _ctx: &PlanningContext,
    ) -> Result<PlanDraft, OracleError> {
        info!(model = %self.config.model, goal, "oracle planning request");
        let json = self
            .complete_json(plan_system_prompt(), plan_user_prompt(goal))
            .await?;
        let mut draft: PlanDraft = serde_json::from_str(&json)
            .map_err(|e| OracleError::InvalidResponse(format!("invalid plan JSON: {e}")))?;
        draft.confidence = draft.confidence.clamp(0.0, 1.0);
        info!(
            steps = draft.steps.len(),
            confidence = draft.confidence,
            "oracle plan parsed"
        );
        Ok(draft)
    }

    async fn suggest_selectors(
        &self,
        page_summary: &str,
        intent: &str,
        _ctx: &PlanningContext,
    ) -> Result<SelectorSuggestions, OracleError> {
        let json = self
            .complete_json(
                selectors_system_prompt(),
                selectors_user_prompt(page_summary, intent),
            )
            .await?;
        serde_json::from_str(&json)
            .map_err(|e| OracleError::InvalidResponse(format!("invalid selectors JSON: {e}")))
    }

    async fn decide_next_action(&self, view: &ContextView) -> Result<Decision, OracleError> {
        let json = self
            .complete_json(decide_system_prompt(), decide_user_prompt(view))
            .await?;
        let raw: DecisionJson = serde_json::from_str(&json)
            .map_err(|e| OracleError::InvalidResponse(format!("invalid decision JSON: {e}")))?;
        raw.into_decision()
    }

    async fn recover_from_error(
        &self,
        error: &str,
        _ctx: &PlanningContext,
    ) -> Result<Recovery, OracleError> {
        let system = "You judge whether a web-automation error is recoverable.\n\
                      Return ONLY one JSON object shaped:\n\
                      {\"recoverable\":false,\"suggestions\":[{\"kind\":\"wait\",\"params\":{},\"reasoning\":\"...\"}]}"
            .to_string();
        let json = self
            .complete_json(system, format!("Error:\n{error}"))
            .await?;
        let raw: RecoveryJson = serde_json::from_str(&json)
            .map_err(|e| OracleError::InvalidResponse(format!("invalid recovery JSON: {e}")))?;
        Ok(Recovery {
            recoverable: raw.recoverable,
            suggestions: raw
                .suggestions
                .into_iter()
                .filter_map(|s| {
                    Some(RecoverySuggestion {
                        kind: parse_kind(&s.kind)?,
                        params: s.params,
                        reasoning: s.reasoning,
                    })
                })
                .collect(),
        })
    }
}

/// Wire shape of a decision; `nextAction` tolerates null, a missing field,
/// and the `{"type": "NONE"}` convention.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecisionJson {
    #[serde(default)]
    goal_achieved: bool,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    next_action: Option<NextActionJson>,
    #[serde(default)]
    data_to_extract: std::collections::BTreeMap<String, Option<String>>,
}

#[derive(Debug, Deserialize)]
struct NextActionJson {
    #[serde(alias = "type")]
    kind: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    description: String,
}

impl DecisionJson {
    fn into_decision(self) -> Result<Decision, OracleError> {
        let next_action = match self.next_action {
            None => None,
            Some(raw) if raw.kind.eq_ignore_ascii_case("none") => None,
            Some(raw) => {
                let kind = parse_kind(&raw.kind).ok_or_else(|| {
                    OracleError::InvalidResponse(format!("unknown action kind '{}'", raw.kind))
                })?;
                Some(ActionProposal {
                    kind,
                    params: raw.params,
                    description: raw.description,
                })
            }
        };
        Ok(Decision {
            goal_achieved: self.goal_achieved,
            reasoning: self.reasoning,
            next_action,
            data_to_extract: self.data_to_extract,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RecoveryJson {
    #[serde(default)]
    recoverable: bool,
    #[serde(default)]
    suggestions: Vec<RecoverySuggestionJson>,
}

#[derive(Debug, Deserialize)]
struct RecoverySuggestionJson {
    kind: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    reasoning: String,
}

fn parse_kind(raw: &str) -> Option<ActionKind> {
    ActionKind::parse(&raw.to_ascii_lowercase())
}

/// Pull the first complete JSON object out of free-form model output.
///
/// Every `{` in the text starts a candidate; the stream deserializer parses
/// exactly one value from there (stopping at its end, string escapes and
/// nested braces included) and reports how far it read, so the matched
/// source span comes back verbatim. Candidates that are not valid objects
/// are skipped.
fn first_json_object(text: &str) -> Option<String> {
    for (offset, _) in text.match_indices('{') {
        let tail = &text[offset..];
        let mut stream = serde_json::Deserializer::from_str(tail).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) if value.is_object() => {
                return Some(tail[..stream.byte_offset()].to_string());
            }
            _ => {}
        }
    }
    None
}
