// ABOUTME: Anthropic Claude Messages API adapter implementing the LlmProvider trait.
// ABOUTME: Maps tool calls to tool_use blocks, tool results to tool_result blocks, and back.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::message::{Message, Role, ToolCall};
use crate::provider::{
    CompletionRequest, CompletionResponse, LlmProvider, ProviderError, Usage,
};
use crate::providers::{ApiEndpoint, send_json};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Claude adapter. Calls the Messages API with tool definitions
/// and maps tool_use blocks back onto [`ToolCall`]s.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new AnthropicProvider with explicit configuration.
    pub fn new(endpoint: ApiEndpoint) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: endpoint.api_key,
            base_url: endpoint.base_url,
        }
    }

    /// Build the JSON request body for the Anthropic Messages API.
    pub fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(convert_message)
            .collect();

        // Messages must alternate roles; tool results for parallel calls share one user turn.
        let messages = coalesce_messages(messages);

        let mut body = json!({
            "model": request.options.model,
            "max_tokens": request.options.max_tokens,
            "temperature": request.options.temperature,
            "messages": messages,
        });

        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.json_schema()
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        body
    }

    /// Parse an Anthropic Messages API response into a [`CompletionResponse`].
    pub fn parse_response(response_body: &Value) -> Result<CompletionResponse, ProviderError> {
        let content = response_body
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| {
                ProviderError::MalformedResponse("missing content array in response".to_string())
            })?;

        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();

        for block in content {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str())
                        && !text.is_empty()
                    {
                        texts.push(text.to_string());
                    }
                }
                Some("tool_use") => tool_calls.push(parse_tool_use(block)?),
                _ => {}
            }
        }

        let usage = response_body
            .get("usage")
            .map(|u| {
                Usage::new(
                    u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
                    u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
                )
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            text: (!texts.is_empty()).then(|| texts.join("\n")),
            tool_calls,
            usage,
        })
    }
}

fn convert_message(message: &Message) -> Value {
    match message.role {
        Role::Assistant if !message.tool_calls.is_empty() => {
            let mut blocks = Vec::new();
            if !message.content.is_empty() {
                blocks.push(json!({"type": "text", "text": message.content}));
            }
            for call in &message.tool_calls {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.arguments
                }));
            }
            json!({"role": "assistant", "content": blocks})
        }
        Role::Assistant => json!({"role": "assistant", "content": message.content}),
        Role::Tool => json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": message.tool_call_id,
                "content": message.content
            }]
        }),
        Role::User | Role::System => json!({"role": "user", "content": message.content}),
    }
}

/// Merge consecutive same-role messages into a single message of content blocks.
fn coalesce_messages(messages: Vec<Value>) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();

    for msg in messages {
        let role = msg
            .get("role")
            .and_then(|r| r.as_str())
            .unwrap_or("user")
            .to_string();

        if let Some(last) = result.last_mut()
            && last.get("role").and_then(|r| r.as_str()) == Some(role.as_str())
        {
            let mut blocks = as_blocks(&last["content"]);
            blocks.extend(as_blocks(&msg["content"]));
            *last = json!({"role": role, "content": blocks});
            continue;
        }

        result.push(msg);
    }

    result
}

fn as_blocks(content: &Value) -> Vec<Value> {
    match content {
        Value::Array(blocks) => blocks.clone(),
        Value::String(text) => vec![json!({"type": "text", "text": text})],
        _ => Vec::new(),
    }
}

/// Parse a single tool_use block.
fn parse_tool_use(block: &Value) -> Result<ToolCall, ProviderError> {
    let name = block.get("name").and_then(|n| n.as_str()).ok_or_else(|| {
        ProviderError::MalformedResponse("tool_use block missing name".to_string())
    })?;
    let id = block.get("id").and_then(|i| i.as_str()).unwrap_or_default();
    let input = block.get("input").cloned().unwrap_or(json!({}));

    Ok(ToolCall::new(id, name, input))
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = self.build_request_body(request);
        let url = format!("{}/v1/messages", self.base_url);

        let http = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let response_body = send_json(http, "anthropic").await?;
        Self::parse_response(&response_body)
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }
}
