// ABOUTME: Test utilities for agentlang-engine, including a scripted LLM provider.
// ABOUTME: Used in tests to drive conversations, retries and fallbacks without real API calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::message::ToolCall;
use crate::provider::{CompletionRequest, CompletionResponse, LlmProvider, ProviderError, Usage};

/// Usage reported by every scripted completion.
pub const SCRIPTED_USAGE: Usage = Usage {
    prompt_tokens: 10,
    completion_tokens: 5,
};

/// One scripted provider outcome.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(CompletionResponse),
    Fail(ProviderError),
}

#[derive(Debug, Default)]
struct ModelScript {
    queue: VecDeque<ScriptStep>,
    repeat: Option<ScriptStep>,
}

/// A provider that answers from per-model scripts.
///
/// Each model has a queue of steps consumed in order, then an optional step
/// repeated forever. A model with nothing left to say yields a
/// `MalformedResponse` error. Tool calls scripted without an id get a fresh
/// `call_N` id every time they are emitted.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, ModelScript>>,
    calls: Mutex<Vec<CompletionRequest>>,
    next_id: AtomicU32,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, model: &str, step: ScriptStep) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(model.to_string())
            .or_default()
            .queue
            .push_back(step);
        self
    }

    fn repeat(self, model: &str, step: ScriptStep) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(model.to_string())
            .or_default()
            .repeat = Some(step);
        self
    }

    /// Queue a final text answer.
    pub fn reply(self, model: &str, text: &str) -> Self {
        self.push(model, ScriptStep::Reply(CompletionResponse::text(text, SCRIPTED_USAGE)))
    }

    /// Queue a completion requesting one tool call.
    pub fn tool_call(self, model: &str, tool: &str, arguments: Value) -> Self {
        self.tool_calls(model, vec![ToolCall::new("", tool, arguments)])
    }

    /// Queue a completion requesting several tool calls, in order.
    pub fn tool_calls(self, model: &str, calls: Vec<ToolCall>) -> Self {
        self.push(model, ScriptStep::Reply(tool_response(calls)))
    }

    /// Queue a provider failure.
    pub fn fail(self, model: &str, error: ProviderError) -> Self {
        self.push(model, ScriptStep::Fail(error))
    }

    /// Answer with `text` once the queue is exhausted.
    pub fn always_reply(self, model: &str, text: &str) -> Self {
        self.repeat(model, ScriptStep::Reply(CompletionResponse::text(text, SCRIPTED_USAGE)))
    }

    /// Request the same tool call forever once the queue is exhausted.
    pub fn always_tool_call(self, model: &str, tool: &str, arguments: Value) -> Self {
        self.repeat(
            model,
            ScriptStep::Reply(tool_response(vec![ToolCall::new("", tool, arguments)])),
        )
    }

    /// Fail forever once the queue is exhausted.
    pub fn always_fail(self, model: &str, error: ProviderError) -> Self {
        self.repeat(model, ScriptStep::Fail(error))
    }

    /// Sleep before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request received, in order.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of requests received for `model`.
    pub fn calls_for(&self, model: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.options.model == model)
            .count()
    }

    fn next_step(&self, model: &str) -> Option<ScriptStep> {
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let script = scripts.get_mut(model)?;
        script.queue.pop_front().or_else(|| script.repeat.clone())
    }

    fn assign_ids(&self, mut response: CompletionResponse) -> CompletionResponse {
        for call in &mut response.tool_calls {
            if call.id.is_empty() {
                let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                call.id = format!("call_{n}");
            }
        }
        response
    }
}

fn tool_response(calls: Vec<ToolCall>) -> CompletionResponse {
    CompletionResponse {
        text: None,
        tool_calls: calls,
        usage: SCRIPTED_USAGE,
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_step(&request.options.model) {
            Some(ScriptStep::Reply(response)) => Ok(self.assign_ids(response)),
            Some(ScriptStep::Fail(error)) => Err(error),
            None => Err(ProviderError::MalformedResponse(format!(
                "no scripted response for model '{}'",
                request.options.model
            ))),
        }
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::provider::CompletionOptions;
    use serde_json::json;

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::user("hi")],
            tools: Vec::new(),
            options: CompletionOptions {
                model: model.to_string(),
                temperature: 0.0,
                max_tokens: 10,
            },
        }
    }

    #[tokio::test]
    async fn queue_then_repeat_then_exhaustion() {
        let provider = ScriptedProvider::new()
            .reply("a", "first")
            .always_fail("a", ProviderError::Unavailable("down".to_string()))
            .reply("b", "only");

        let first = provider.complete(&request("a")).await.unwrap();
        assert_eq!(first.text.as_deref(), Some("first"));
        assert_eq!(first.usage, SCRIPTED_USAGE);

        for _ in 0..2 {
            let err = provider.complete(&request("a")).await.unwrap_err();
            assert_eq!(err.kind(), "unavailable");
        }

        assert!(provider.complete(&request("b")).await.is_ok());
        assert!(provider.complete(&request("b")).await.is_err());
        assert!(provider.complete(&request("unknown")).await.is_err());

        assert_eq!(provider.call_count(), 6);
        assert_eq!(provider.calls_for("a"), 3);
    }

    #[tokio::test]
    async fn repeated_tool_calls_get_fresh_ids() {
        let provider = ScriptedProvider::new().always_tool_call("m", "double", json!({"x": 1}));

        let first = provider.complete(&request("m")).await.unwrap();
        let second = provider.complete(&request("m")).await.unwrap();
        assert_eq!(first.tool_calls[0].id, "call_1");
        assert_eq!(second.tool_calls[0].id, "call_2");
    }
}
