// ABOUTME: Deterministic offline provider used in mock mode and when no credentials are configured.
// ABOUTME: Always answers with greeting-style text, never requests tools, and reports word-count usage.

use async_trait::async_trait;

use crate::provider::{CompletionRequest, CompletionResponse, LlmProvider, ProviderError, Usage};

/// Offline stand-in for a real model. Output depends only on the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        Self
    }

    /// The reply text for a request.
    pub fn reply_for(request: &CompletionRequest) -> String {
        let task = request.last_user_message().unwrap_or_default().trim();
        if task.is_empty() {
            format!("Hello! This is a mock response from {}.", request.options.model)
        } else {
            format!(
                "Hello! This is a mock response from {}. Task: {}",
                request.options.model, task
            )
        }
    }
}

fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let text = Self::reply_for(request);
        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| word_count(&m.content))
            .sum();
        let usage = Usage::new(prompt_tokens, word_count(&text));
        tracing::debug!(model = %request.options.model, "mock completion");
        Ok(CompletionResponse::text(&text, usage))
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}
