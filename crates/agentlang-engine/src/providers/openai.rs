// ABOUTME: OpenAI Chat Completions adapter implementing the LlmProvider trait.
// ABOUTME: Translates conversations into function-calling requests and parses tool_calls responses.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::message::{Message, Role, ToolCall};
use crate::provider::{
    CompletionRequest, CompletionResponse, LlmProvider, ProviderError, Usage,
};
use crate::providers::{ApiEndpoint, send_json};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI runtime adapter. Calls the Chat Completions API with function
/// definitions and maps tool_calls back onto [`ToolCall`]s.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a new OpenAiProvider with explicit configuration.
    pub fn new(endpoint: ApiEndpoint) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: endpoint.api_key,
            base_url: endpoint.base_url,
        }
    }

    /// Build the JSON request body for the Chat Completions API.
    pub fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(convert_message).collect();

        let mut body = json!({
            "model": request.options.model,
            "messages": messages,
        });
        if is_reasoning_model(&request.options.model) {
            body["max_completion_tokens"] = json!(request.options.max_tokens);
        } else {
            body["temperature"] = json!(request.options.temperature);
            body["max_tokens"] = json!(request.options.max_tokens);
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.json_schema()
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }

        body
    }

    /// Parse a Chat Completions response into a [`CompletionResponse`].
    pub fn parse_response(response_body: &Value) -> Result<CompletionResponse, ProviderError> {
        let message = response_body
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .ok_or_else(|| {
                ProviderError::MalformedResponse("missing choices[0].message".to_string())
            })?;

        let text = message
            .get("content")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let mut tool_calls = Vec::new();
        if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
            for call in calls {
                tool_calls.push(parse_tool_call(call)?);
            }
        }

        let usage = response_body
            .get("usage")
            .map(|u| {
                Usage::new(
                    u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
                    u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
                )
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            text,
            tool_calls,
            usage,
        })
    }
}

fn convert_message(message: &Message) -> Value {
    match message.role {
        Role::System => json!({"role": "system", "content": message.content}),
        Role::User => json!({"role": "user", "content": message.content}),
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string()
                        }
                    })
                })
                .collect();
            let content = if message.content.is_empty() {
                Value::Null
            } else {
                json!(message.content)
            };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        Role::Assistant => json!({"role": "assistant", "content": message.content}),
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content
        }),
    }
}

/// Parse one entry of `message.tool_calls`. Arguments arrive as a JSON-encoded string.
fn parse_tool_call(call: &Value) -> Result<ToolCall, ProviderError> {
    let id = call.get("id").and_then(|i| i.as_str()).unwrap_or_default();
    let function = call.get("function").ok_or_else(|| {
        ProviderError::MalformedResponse("tool call missing function".to_string())
    })?;
    let name = function
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| ProviderError::MalformedResponse("tool call missing name".to_string()))?;

    let arguments = match function.get("arguments") {
        Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
        Some(Value::String(raw)) => serde_json::from_str(raw).map_err(|e| {
            ProviderError::MalformedResponse(format!("invalid arguments for '{name}': {e}"))
        })?,
        Some(other) => other.clone(),
        None => json!({}),
    };

    Ok(ToolCall::new(id, name, arguments))
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = self.build_request_body(request);
        let url = format!("{}/v1/chat/completions", self.base_url);

        let http = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body);

        let response_body = send_json(http, "openai").await?;
        Self::parse_response(&response_body)
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

/// o-series reasoning models take `max_completion_tokens` and reject `temperature`.
fn is_reasoning_model(model: &str) -> bool {
    let model = model.to_ascii_lowercase();
    ["o1", "o3", "o4"]
        .iter()
        .any(|prefix| model.starts_with(prefix))
}
