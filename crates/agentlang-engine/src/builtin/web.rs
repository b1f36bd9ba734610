// ABOUTME: Implements the http_get and web_search built-in tools.
// ABOUTME: http_get fetches a URL with reqwest; web_search is a placeholder with no search backend.

use async_trait::async_trait;
use serde_json::{Value, json};

use agentlang_core::{ParamSpec, ParamType, ToolArgs, ToolDefinition, ToolHandler};

use super::str_arg;

const DEFAULT_MAX_CHARS: usize = 20_000;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
/// Safe for multibyte UTF-8 (never slices mid-character).
fn truncate_utf8_safe(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// Fetches a URL and returns the response body as text.
#[derive(Clone)]
pub struct HttpGetTool {
    client: reqwest::Client,
}

impl HttpGetTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition::new(
            "http_get",
            "Fetch a URL with an HTTP GET request and return the response body.",
            vec![
                ParamSpec::required("url", ParamType::String).describe("Absolute http(s) URL"),
                ParamSpec::optional("max_chars", ParamType::Int, Some(json!(DEFAULT_MAX_CHARS)))
                    .describe("Truncate the body after this many characters"),
            ],
        )
    }
}

impl Default for HttpGetTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolHandler for HttpGetTool {
    async fn call(&self, args: ToolArgs) -> Result<Value, anyhow::Error> {
        let url = str_arg(&args, "url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("unsupported URL scheme: {url}");
        }
        let max_chars = args
            .get("max_chars")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GET {url} returned {status}");
        }

        let body = response.text().await?;
        Ok(Value::String(truncate_utf8_safe(&body, max_chars)))
    }
}

/// Stand-in for a search integration. Returns an empty result set.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSearchTool;

impl WebSearchTool {
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new(
            "web_search",
            "Search the web for a query.",
            vec![
                ParamSpec::required("query", ParamType::String).describe("Search query"),
                ParamSpec::optional("max_results", ParamType::Int, Some(json!(5)))
                    .describe("Maximum number of results"),
            ],
        )
    }
}

#[async_trait]
impl ToolHandler for WebSearchTool {
    async fn call(&self, args: ToolArgs) -> Result<Value, anyhow::Error> {
        let query = str_arg(&args, "query")?;
        let max_results = args.get("max_results").and_then(Value::as_u64).unwrap_or(5);
        tracing::debug!(query, max_results, "web_search has no backend configured");
        Ok(json!({
            "query": query,
            "max_results": max_results,
            "results": [],
            "note": "no search backend is configured"
        }))
    }
}
