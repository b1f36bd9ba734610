// ABOUTME: Defines the LlmProvider trait that the gateway and every backend adapter implement.
// ABOUTME: Also defines the completion request/response shapes, usage accounting and ProviderError.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use agentlang_core::ToolDefinition;

use crate::message::{Message, ToolCall};

/// Token accounting for one or more provider calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Sampling options for a single completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Everything a backend needs for one completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub options: CompletionOptions,
}

impl CompletionRequest {
    /// The most recent user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::message::Role::User)
            .map(|m| m.content.as_str())
    }
}

/// One completion: optional text, ordered tool calls and usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

impl CompletionResponse {
    pub fn text(text: &str, usage: Usage) -> Self {
        Self {
            text: Some(text.to_string()),
            tool_calls: Vec::new(),
            usage,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Check the structural guarantees callers rely on: every call has a name
    /// and a non-empty id, and ids are unique within this completion.
    pub fn validate(&self) -> Result<(), ProviderError> {
        let mut seen = HashSet::new();
        for call in &self.tool_calls {
            if call.name.trim().is_empty() {
                return Err(ProviderError::MalformedResponse(
                    "tool call without a name".to_string(),
                ));
            }
            if call.id.trim().is_empty() {
                return Err(ProviderError::MalformedResponse(format!(
                    "tool call '{}' without an id",
                    call.name
                )));
            }
            if !seen.insert(call.id.as_str()) {
                return Err(ProviderError::MalformedResponse(format!(
                    "duplicate tool call id '{}'",
                    call.id
                )));
            }
        }
        Ok(())
    }
}

/// Failures surfaced by a provider. All of them are recoverable under a retry policy.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Stable machine label for this failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Auth(_) => "auth",
            ProviderError::RateLimited(_) => "rate_limit",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::MalformedResponse(_) => "malformed_response",
            ProviderError::Unavailable(_) => "unavailable",
        }
    }
}

/// Uniform contract over language-model backends. Implementations perform
/// no retries; retry policy belongs to the caller.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Produce a single completion for the conversation and tool catalog.
    async fn complete(&self, request: &CompletionRequest)
    -> Result<CompletionResponse, ProviderError>;

    /// Provider name for logging and display (e.g. "anthropic", "openai").
    fn provider_name(&self) -> &str;
}
