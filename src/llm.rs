//! Language-model boundary.
//!
//! The external tool-calling service sits behind [`ChatModel`] with two
//! implementations: [`CohereChat`] talks to the hosted API over HTTP, and
//! [`StaticChatModel`] is a deterministic stand-in so the reconciler's
//! fallback logic is testable without network access.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::domain::{ChatRole, ChatTurn};
use crate::error::{Result, ScoutError};

const COHERE_CHAT_URL: &str = "https://api.cohere.com/v1/chat";
pub const DEFAULT_CHAT_MODEL: &str = "command-a-03-2025";

// A hung chat call must fail into the keyword fallback, not stall the search.
const CHAT_TIMEOUT_SECONDS: u64 = 30;

/// One declared tool parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ToolParameter {
    pub description: String,
    #[serde(rename = "type")]
    pub param_type: &'static str,
    pub required: bool,
}

/// A tool offered to the model. Parameters are kept in a `BTreeMap` so the
/// serialized definition is stable across calls.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "parameter_definitions")]
    pub parameter_definitions: BTreeMap<String, ToolParameter>,
}

/// Structured invocation the model requested instead of answering in text.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ChatReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub preamble: Option<String>,
    pub chat_history: Vec<ChatTurn>,
    pub tools: Vec<ToolSpec>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply>;
}

/// HTTP client for the Cohere chat API.
pub struct CohereChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl CohereChat {
    pub fn new(api_key: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CHAT_TIMEOUT_SECONDS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            model,
        }
    }

    /// Build from `COHERE_API_KEY`; `None` when the key is absent so callers
    /// can degrade to keyword-only extraction instead of failing at startup.
    pub fn from_env() -> Option<Self> {
        std::env::var("COHERE_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(|key| Self::new(key, DEFAULT_CHAT_MODEL.to_string()))
    }
}

#[async_trait]
impl ChatModel for CohereChat {
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply> {
        let mut body = serde_json::json!({
            "model": self.model,
            "message": request.message,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if let Some(preamble) = &request.preamble {
            body["preamble"] = Value::String(preamble.clone());
        }
        if !request.chat_history.is_empty() {
            let history: Vec<Value> = request
                .chat_history
                .iter()
                .map(|turn| {
                    serde_json::json!({
                        "role": match turn.role {
                            ChatRole::User => "USER",
                            ChatRole::Assistant => "CHATBOT",
                        },
                        "message": turn.content,
                    })
                })
                .collect();
            body["chat_history"] = Value::Array(history);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::to_value(&request.tools)?;
        }

        let response = self
            .client
            .post(COHERE_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScoutError::Model {
                message: format!("chat API returned status {status}"),
            });
        }

        let payload: Value = response.json().await?;
        let text = payload["text"]
            .as_str()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let tool_calls = payload["tool_calls"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|call| {
                call["name"].as_str().map(|name| ToolCall {
                    name: name.to_string(),
                    parameters: call["parameters"].clone(),
                })
            })
            .collect();

        Ok(ChatReply { text, tool_calls })
    }
}

/// Deterministic [`ChatModel`] used in tests and for offline CLI search:
/// either hands back a canned reply or fails the way a network error would.
pub struct StaticChatModel {
    outcome: std::result::Result<ChatReply, String>,
}

impl StaticChatModel {
    pub fn replying(reply: ChatReply) -> Self {
        Self { outcome: Ok(reply) }
    }

    /// A model that answers with neither text nor a tool call.
    pub fn silent() -> Self {
        Self {
            outcome: Ok(ChatReply::default()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
        }
    }
}

#[async_trait]
impl ChatModel for StaticChatModel {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatReply> {
        match &self.outcome {
            Ok(reply) => Ok(reply.clone()),
            Err(message) => Err(ScoutError::Model {
                message: message.clone(),
            }),
        }
    }
}
