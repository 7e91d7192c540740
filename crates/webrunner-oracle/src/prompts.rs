//! Prompt construction for the LLM oracle.
//!
//! Prompts render the closed action catalog and a bounded context so the
//! model can only answer in terms the engine validates afterwards.

use std::fmt::Write;

use webrunner_core::executor::ContextView;
use webrunner_core::types::{Action, ActionKind};

pub(crate) const MAX_PROMPT_LOG_CHARS: usize = 4_000;
pub(crate) const MAX_OUTPUT_LOG_CHARS: usize = 8_000;

/// Bound a string for log output, noting how much was cut.
pub(crate) fn clip_for_log(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => {
            let dropped = text[cut..].chars().count();
            format!("{} ...(+{dropped} chars clipped)", &text[..cut])
        }
    }
}

fn action_catalog() -> String {
    let mut out = String::from("Action Catalog (the ONLY allowed kinds):\n");
    for kind in ActionKind::ALL {
        let _ = writeln!(out, "- kind: {kind}");
        let params = match kind {
            ActionKind::Navigate => {
                "url (string, required); waitUntil (enum load|dom_content_loaded|network_idle, optional); timeoutMs (integer, optional)"
            }
            ActionKind::Click => {
                "selector (string, required); waitForNavigation (boolean, optional)"
            }
            ActionKind::Type => {
                "selector (string, required); text (string, required); submit (boolean, optional)"
            }
            ActionKind::ExtractText => {
                "selector (string, required); multiple (boolean, optional)"
            }
            ActionKind::ExtractAttribute => {
                "selector (string, required); attribute (string, required); multiple (boolean, optional)"
            }
            ActionKind::Wait => "durationMs (integer, optional)",
            ActionKind::Search => {
                "query (string, required); engine (enum default|google|bing|duckduckgo, optional)"
            }
        };
        let _ = writeln!(out, "  params: {params}");
        let outputs: Vec<String> = Action::output_shape(kind)
            .iter()
            .map(|(field, _)| (*field).to_string())
            .collect();
        let _ = writeln!(out, "  outputs: {}", outputs.join(", "));
    }
    out
}

pub(crate) fn plan_system_prompt() -> String {
    let mut system = String::from(
        "You are the planning component of a headless web-automation engine.\n\
         You turn a user goal into an ordered list of atomic web actions.\n\n",
    );
    system.push_str(&action_catalog());
    system.push_str(
        "\nPlanning Rules:\n\
         1) Return ONLY one valid JSON object, no prose around it.\n\
         2) Shape: {\"steps\":[{\"kind\":\"navigate\",\"params\":{},\"description\":\"...\"}],\"confidence\":0.0,\"reasoning\":\"...\"}\n\
         3) Use only kinds from the Action Catalog; params must satisfy the listed schema exactly.\n\
         4) Steps may carry optional expectedOutput (field -> string|number|boolean|array|object|any) and failureConditions ({field, op, value}).\n\
         5) Prefer the fewest steps that achieve the goal.\n",
    );
    system
}

pub(crate) fn plan_user_prompt(goal: &str) -> String {
    format!("Goal:\n{goal}\n\nReturn the plan JSON now.")
}

pub(crate) fn selectors_system_prompt() -> String {
    "You suggest CSS selectors for a stated intent on a web page.\n\
     You will be given a bounded page summary, never the full page.\n\
     Return ONLY one JSON object shaped:\n\
     {\"selectors\":[{\"purpose\":\"...\",\"selector\":\"...\",\"confidence\":0.0}],\"reasoning\":\"...\"}\n\
     Prefer simple selectors (tag, #id, .class) that survive page changes."
        .to_string()
}

pub(crate) fn selectors_user_prompt(page_summary: &str, intent: &str) -> String {
    format!("Intent: {intent}\n\nPage summary:\n{page_summary}")
}

pub(crate) fn decide_system_prompt() -> String {
    let mut system = String::from(
        "You steer a web-automation feedback loop, one action at a time.\n\
         Each turn you see the goal, collected data, recent actions, visited\n\
         URLs, and a bounded state of the current page.\n\n",
    );
    system.push_str(&action_catalog());
    system.push_str(
        "\nDecision Rules:\n\
         1) Return ONLY one valid JSON object shaped:\n\
            {\"goalAchieved\":false,\"reasoning\":\"...\",\"nextAction\":{\"kind\":\"navigate\",\"params\":{},\"description\":\"...\"},\"dataToExtract\":{\"key\":\".selector\"}}\n\
         2) Set goalAchieved true (and nextAction null) once the collected data satisfies the goal.\n\
         3) Set nextAction null when there is nothing useful left to do.\n\
         4) dataToExtract maps a collection key to a CSS selector, or to null to read the key off the action result.\n\
         5) Do not revisit URLs you have already visited unless the page should have changed.\n",
    );
    system
}

pub(crate) fn decide_user_prompt(view: &ContextView) -> String {
    serde_json::to_string_pretty(view).unwrap_or_else(|_| "{}".to_string())
}
