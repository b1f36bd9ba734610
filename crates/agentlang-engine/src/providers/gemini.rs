// ABOUTME: Google Gemini generateContent adapter implementing the LlmProvider trait.
// ABOUTME: Gemini returns no call ids, so each functionCall gets a generated ulid-based id.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Value, json};
use ulid::Ulid;

use crate::message::{Message, Role, ToolCall};
use crate::provider::{
    CompletionRequest, CompletionResponse, LlmProvider, ProviderError, Usage,
};
use crate::providers::{ApiEndpoint, send_json};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini adapter. Calls generateContent with function declarations and maps
/// functionCall parts back onto [`ToolCall`]s.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    /// Create a new GeminiProvider with explicit configuration.
    pub fn new(endpoint: ApiEndpoint) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: endpoint.api_key,
            base_url: endpoint.base_url,
        }
    }

    /// Build the JSON request body for the generateContent API.
    pub fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        // functionResponse parts need the tool name, which only the issuing turn carries.
        let mut call_names: HashMap<&str, &str> = HashMap::new();
        let mut contents = Vec::new();
        for message in request.messages.iter().filter(|m| m.role != Role::System) {
            for call in &message.tool_calls {
                call_names.insert(call.id.as_str(), call.name.as_str());
            }
            contents.push(convert_message(message, &call_names));
        }
        let contents = coalesce_contents(contents);

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.options.temperature,
                "maxOutputTokens": request.options.max_tokens
            }
        });

        if !system.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system.join("\n\n")}]});
        }

        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": strip_defaults(tool.json_schema())
                    })
                })
                .collect();
            body["tools"] = json!([{"functionDeclarations": declarations}]);
        }

        body
    }

    /// Parse a generateContent response into a [`CompletionResponse`].
    pub fn parse_response(response_body: &Value) -> Result<CompletionResponse, ProviderError> {
        let parts = response_body
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .ok_or_else(|| {
                ProviderError::MalformedResponse(
                    "missing candidates[0].content.parts".to_string(),
                )
            })?;

        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();

        for part in parts {
            if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(|n| n.as_str()).ok_or_else(|| {
                    ProviderError::MalformedResponse("functionCall missing name".to_string())
                })?;
                let args = call.get("args").cloned().unwrap_or(json!({}));
                let id = format!("call_{}", Ulid::new());
                tool_calls.push(ToolCall::new(&id, name, args));
            } else if let Some(text) = part.get("text").and_then(|t| t.as_str())
                && !text.is_empty()
            {
                texts.push(text.to_string());
            }
        }

        let usage = response_body
            .get("usageMetadata")
            .map(|u| {
                Usage::new(
                    u.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0),
                    u.get("candidatesTokenCount")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
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

fn convert_message(message: &Message, call_names: &HashMap<&str, &str>) -> Value {
    match message.role {
        Role::Assistant => {
            let mut parts = Vec::new();
            if !message.content.is_empty() {
                parts.push(json!({"text": message.content}));
            }
            for call in &message.tool_calls {
                parts.push(json!({"functionCall": {"name": call.name, "args": call.arguments}}));
            }
            json!({"role": "model", "parts": parts})
        }
        Role::Tool => {
            let call_id = message.tool_call_id.as_deref().unwrap_or_default();
            let name = call_names.get(call_id).copied().unwrap_or(call_id);
            json!({
                "role": "user",
                "parts": [{
                    "functionResponse": {
                        "name": name,
                        "response": {"content": message.content}
                    }
                }]
            })
        }
        Role::User | Role::System => {
            json!({"role": "user", "parts": [{"text": message.content}]})
        }
    }
}

/// Merge consecutive same-role contents so turns alternate.
fn coalesce_contents(contents: Vec<Value>) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();

    for content in contents {
        if let Some(last) = result.last_mut()
            && last.get("role") == content.get("role")
            && let (Some(existing), Some(extra)) = (
                last.get_mut("parts").and_then(Value::as_array_mut),
                content.get("parts").and_then(Value::as_array),
            )
        {
            existing.extend(extra.iter().cloned());
            continue;
        }
        result.push(content);
    }

    result
}

/// Gemini's schema dialect rejects `default`; drop it from every property.
fn strip_defaults(mut schema: Value) -> Value {
    if let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        for property in properties.values_mut() {
            if let Some(obj) = property.as_object_mut() {
                obj.remove("default");
            }
        }
    }
    schema
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = self.build_request_body(request);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, request.options.model
        );

        let http = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body);

        let response_body = send_json(http, "gemini").await?;
        Self::parse_response(&response_body)
    }

    fn provider_name(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CompletionOptions;
    use agentlang_core::{ParamSpec, ParamType, ToolDefinition};

    fn provider() -> GeminiProvider {
        GeminiProvider::new(ApiEndpoint::new("test-key", DEFAULT_BASE_URL))
    }

    fn request(messages: Vec<Message>, tools: Vec<ToolDefinition>) -> CompletionRequest {
        CompletionRequest {
            messages,
            tools,
            options: CompletionOptions {
                model: "gemini-2.0-flash".to_string(),
                temperature: 0.5,
                max_tokens: 512,
            },
        }
    }

    #[test]
    fn gemini_builds_request_body() {
        let tool = ToolDefinition::new(
            "fetch",
            "Fetch a page",
            vec![
                ParamSpec::required("url", ParamType::String),
                ParamSpec::optional("limit", ParamType::Int, Some(json!(10))),
            ],
        );
        let body = provider().build_request_body(&request(
            vec![Message::system("Be helpful."), Message::user("Fetch example.com")],
            vec![tool],
        ));

        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "Be helpful."
        );
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 512);

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["role"], "user");

        let decl = &body["tools"][0]["functionDeclarations"][0];
        assert_eq!(decl["name"], "fetch");
        assert_eq!(decl["parameters"]["properties"]["limit"]["type"], "integer");
        assert!(decl["parameters"]["properties"]["limit"].get("default").is_none());
    }

    #[test]
    fn gemini_function_responses_carry_tool_names() {
        let body = provider().build_request_body(&request(
            vec![
                Message::user("Fetch two pages"),
                Message::assistant_tool_calls(
                    None,
                    vec![
                        ToolCall::new("call_1", "fetch", json!({"url": "a"})),
                        ToolCall::new("call_2", "fetch", json!({"url": "b"})),
                    ],
                ),
                Message::tool("call_1", "page a"),
                Message::tool("call_2", "page b"),
            ],
            Vec::new(),
        ));

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");

        let responses = contents[2]["parts"].as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["functionResponse"]["name"], "fetch");
        assert_eq!(
            responses[1]["functionResponse"]["response"]["content"],
            "page b"
        );
    }

    #[test]
    fn gemini_parses_text_response() {
        let response = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hi there"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 8, "candidatesTokenCount": 2}
        });

        let parsed = GeminiProvider::parse_response(&response).unwrap();
        assert_eq!(parsed.text.as_deref(), Some("Hi there"));
        assert_eq!(parsed.usage, Usage::new(8, 2));
    }

    #[test]
    fn gemini_assigns_unique_ids_to_function_calls() {
        let response = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": "fetch", "args": {"url": "a"}}},
                    {"functionCall": {"name": "fetch", "args": {"url": "b"}}}
                ]}
            }]
        });

        let parsed = GeminiProvider::parse_response(&response).unwrap();
        assert_eq!(parsed.tool_calls.len(), 2);
        assert!(parsed.tool_calls[0].id.starts_with("call_"));
        assert_ne!(parsed.tool_calls[0].id, parsed.tool_calls[1].id);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn gemini_rejects_missing_candidates() {
        let err = GeminiProvider::parse_response(&json!({"promptFeedback": {}})).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }

    #[tokio::test]
    #[cfg(feature = "live-test")]
    async fn gemini_adapter_basic() {
        let creds = crate::providers::Credentials::from_env();
        let endpoint = creds.gemini.expect("GEMINI_API_KEY must be set");
        let provider = GeminiProvider::new(endpoint);

        let req = request(vec![Message::user("Say hello in five words.")], Vec::new());
        let result = provider.complete(&req).await;
        assert!(result.is_ok(), "live test failed: {:?}", result.err());
    }
}
