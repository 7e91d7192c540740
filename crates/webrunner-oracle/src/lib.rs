//! # Webrunner Oracle
//!
//! LLM-backed implementation of the `AiOracle` interface: an
//! OpenAI-compatible chat-completions client, prompt construction over the
//! engine's bounded context records, and robust JSON extraction from model
//! output. A mock client is included for tests and examples.

mod client;
mod oracle;
mod prompts;

pub use client::{HttpLlmClient, HttpLlmClientConfig, LlmClient, LlmError, LlmRequest, MockLlmClient};
pub use oracle::{LlmOracle, LlmOracleConfig};
