//! Anthropic-backed reasoning agent and conversation loop
//!
//! The agent holds the untrusted side of the system: it only ever sees the
//! anonymous store through the bridge, and its context only ever carries
//! pseudonyms. The conversation loop drives the Messages API tool-use
//! protocol: send the transcript, execute any tool-use blocks through the
//! bridge, feed the results back, and repeat until the model answers in
//! prose or resolves a template.

pub mod tools;

use crate::bridge::Bridge;
use crate::config::AgentSettings;
use crate::error::{KalypsoError, Result};
use crate::types::{Dispatch, ToolCall, TurnState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::env;
use tracing::{debug, info, warn};

/// Configuration for the agent client
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Anthropic API key, read from the environment only
    pub api_key: String,

    /// Model to use
    pub model: String,

    /// Max tokens per response
    pub max_tokens: usize,

    /// API base URL
    pub api_base: String,

    /// Cap on tool round-trips within one question
    pub max_tool_turns: usize,
}

impl AgentConfig {
    /// Build from settings; the key itself never lives in a settings file
    pub fn from_settings(settings: &AgentSettings) -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            return Err(KalypsoError::Config(config::ConfigError::Message(
                "ANTHROPIC_API_KEY not set".to_string(),
            )));
        }

        Ok(Self {
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            api_base: settings.api_base.clone(),
            max_tool_turns: settings.max_tool_turns,
        })
    }
}

/// Anthropic Messages API request format
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    system: &'a str,
    tools: &'a Value,
    messages: &'a [Value],
}

/// HTTP client for the Messages API
pub struct AgentClient {
    config: AgentConfig,
    client: reqwest::Client,
}

impl AgentClient {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn max_tool_turns(&self) -> usize {
        self.config.max_tool_turns
    }

    /// One Messages API round trip; returns the raw response body
    async fn send(&self, messages: &[Value]) -> Result<Value> {
        debug!("Calling Anthropic API ({} messages)", messages.len());

        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: tools::SYSTEM_PROMPT,
            tools: &tools::TOOL_DEFINITIONS,
            messages,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.api_base))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(KalypsoError::AgentApi(format!(
                "API request failed with status {}: {}",
                status, error_text
            )));
        }

        Ok(response.json().await?)
    }
}

/// One executed tool call, as recorded in the conversation transcript
///
/// For `template_response` the recorded output is the original narrative with
/// markers intact; resolved names exist only in the value returned to the
/// caller, never in anything fed back to the agent.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeRecord {
    pub tool: String,
    pub input: Value,
    pub output: String,
    pub at: DateTime<Utc>,
}

/// How one user question ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model called `template_response`; carries the resolved narrative
    Resolved(String),

    /// The model answered in prose without markers
    Narrative(String),
}

/// A multi-turn conversation between one human and the agent
pub struct Conversation {
    client: AgentClient,
    bridge: Bridge,
    messages: Vec<Value>,
    transcript: Vec<ExchangeRecord>,
}

impl Conversation {
    pub fn new(client: AgentClient, bridge: Bridge) -> Self {
        Self {
            client,
            bridge,
            messages: Vec::new(),
            transcript: Vec::new(),
        }
    }

    /// Executed tool calls so far, oldest first
    pub fn transcript(&self) -> &[ExchangeRecord] {
        &self.transcript
    }

    /// Ask one question and drive tool use until the model concludes
    pub async fn ask(&mut self, question: &str) -> Result<TurnOutcome> {
        self.messages.push(json!({
            "role": "user",
            "content": question,
        }));

        let mut state = TurnState::AwaitingCall;
        for _ in 0..self.client.max_tool_turns() {
            let response = self.client.send(&self.messages).await?;
            let content = response
                .get("content")
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new()));

            // Echo the assistant turn back verbatim so tool_use ids line up
            self.messages.push(json!({
                "role": "assistant",
                "content": content.clone(),
            }));

            let blocks = content.as_array().cloned().unwrap_or_default();
            let tool_uses: Vec<&Value> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
                .collect();

            if tool_uses.is_empty() {
                let text = blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n");
                info!("Agent concluded with a narrative response");
                return Ok(TurnOutcome::Narrative(text));
            }

            let mut results: Vec<Value> = Vec::new();
            let mut resolved_final: Option<String> = None;

            for block in tool_uses {
                let id = block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let input = block.get("input").cloned().unwrap_or(json!({}));

                state = state.begin_dispatch()?;
                match self.execute(&name, input.clone()) {
                    Ok(outcome) => {
                        let fed_back = match &outcome {
                            Dispatch::Result(out) => out.clone(),
                            Dispatch::Final { resolved, original } => {
                                resolved_final = Some(resolved.clone());
                                original.clone()
                            }
                        };
                        self.transcript.push(ExchangeRecord {
                            tool: name,
                            input,
                            output: fed_back.clone(),
                            at: Utc::now(),
                        });
                        results.push(json!({
                            "type": "tool_result",
                            "tool_use_id": id,
                            "content": fed_back,
                        }));
                        state = state.complete(&outcome).acknowledge();
                    }
                    Err(e) if is_retriable(&e) => {
                        warn!("Tool call {} failed retriably: {}", name, e);
                        results.push(json!({
                            "type": "tool_result",
                            "tool_use_id": id,
                            "content": e.to_string(),
                            "is_error": true,
                        }));
                        state = TurnState::Error.acknowledge();
                    }
                    Err(e) => return Err(e),
                }
            }

            self.messages.push(json!({
                "role": "user",
                "content": results,
            }));

            if let Some(resolved) = resolved_final {
                info!("Agent concluded with a resolved template");
                return Ok(TurnOutcome::Resolved(resolved));
            }
        }

        Err(KalypsoError::Other(format!(
            "agent exceeded {} tool turns without concluding",
            self.client.max_tool_turns()
        )))
    }

    fn execute(&self, name: &str, input: Value) -> Result<Dispatch> {
        let call = ToolCall::decode(name, input)?;
        self.bridge.dispatch(&call)
    }
}

/// Failures the agent can recover from by issuing a different call
fn is_retriable(error: &KalypsoError) -> bool {
    matches!(
        error,
        KalypsoError::Serialization(_) | KalypsoError::UnknownTable(_)
    )
}
