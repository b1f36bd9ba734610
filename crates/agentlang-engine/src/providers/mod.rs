// ABOUTME: Provider module aggregating the backend adapters plus their shared HTTP plumbing.
// ABOUTME: Holds per-provider credentials loaded from the environment and status-code classification.

pub mod anthropic;
pub mod gemini;
pub mod mock;
pub mod openai;

use serde_json::Value;

use agentlang_core::ProviderKind;

use crate::provider::ProviderError;

/// API key and base URL for one hosted provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    pub api_key: String,
    pub base_url: String,
}

impl ApiEndpoint {
    pub fn new(api_key: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Credentials for every hosted provider that has an API key configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub openai: Option<ApiEndpoint>,
    pub anthropic: Option<ApiEndpoint>,
    pub gemini: Option<ApiEndpoint>,
}

impl Credentials {
    /// Read `OPENAI_API_KEY`, `ANTHROPIC_API_KEY` and `GEMINI_API_KEY`, with
    /// optional `*_BASE_URL` overrides. Empty keys count as absent.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Credentials::from_env`] but reading from an arbitrary lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let endpoint = |prefix: &str, default_base: &str| {
            let key = lookup(&format!("{prefix}_API_KEY")).filter(|k| !k.trim().is_empty())?;
            let base = lookup(&format!("{prefix}_BASE_URL"))
                .filter(|b| !b.trim().is_empty())
                .unwrap_or_else(|| default_base.to_string());
            Some(ApiEndpoint::new(&key, &base))
        };

        Self {
            openai: endpoint("OPENAI", openai::DEFAULT_BASE_URL),
            anthropic: endpoint("ANTHROPIC", anthropic::DEFAULT_BASE_URL),
            gemini: endpoint("GEMINI", gemini::DEFAULT_BASE_URL),
        }
    }

    pub fn for_kind(&self, kind: ProviderKind) -> Option<&ApiEndpoint> {
        match kind {
            ProviderKind::OpenAi => self.openai.as_ref(),
            ProviderKind::Anthropic => self.anthropic.as_ref(),
            ProviderKind::Gemini => self.gemini.as_ref(),
            ProviderKind::Mock => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.openai.is_none() && self.anthropic.is_none() && self.gemini.is_none()
    }
}

/// Send a prepared request and return the decoded JSON body, mapping
/// transport failures and HTTP status codes onto [`ProviderError`].
pub(crate) async fn send_json(
    request: reqwest::RequestBuilder,
    provider: &str,
) -> Result<Value, ProviderError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::Timeout(format!("{provider}: {e}"))
        } else {
            ProviderError::Unavailable(format!("{provider}: HTTP request failed: {e}"))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body, provider));
    }

    response.json().await.map_err(|e| {
        ProviderError::MalformedResponse(format!("{provider}: failed to parse JSON: {e}"))
    })
}

/// Map a non-success HTTP status to the matching error kind.
pub(crate) fn classify_status(
    status: reqwest::StatusCode,
    body: &str,
    provider: &str,
) -> ProviderError {
    let detail = format!("{provider} returned {status}: {}", truncate(body, 300));
    match status {
        reqwest::StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(detail),
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            ProviderError::Auth(detail)
        }
        reqwest::StatusCode::REQUEST_TIMEOUT | reqwest::StatusCode::GATEWAY_TIMEOUT => {
            ProviderError::Timeout(detail)
        }
        s if s.is_server_error() => ProviderError::Unavailable(detail),
        _ => ProviderError::MalformedResponse(detail),
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
