// ABOUTME: The provider gateway: routes each completion to a backend chosen by model family.
// ABOUTME: Falls back to the mock backend in mock mode or when the family has no credentials.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use agentlang_core::{ModelRouter, ProviderKind};

use crate::provider::{CompletionRequest, CompletionResponse, LlmProvider, ProviderError};
use crate::providers::Credentials;
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::gemini::GeminiProvider;
use crate::providers::mock::MockProvider;
use crate::providers::openai::OpenAiProvider;

/// Uniform entry point over every configured backend.
///
/// The gateway performs no retries. Backends are constructed once, up front,
/// for each provider family that has credentials.
pub struct ProviderGateway {
    router: ModelRouter,
    mock_mode: bool,
    backends: HashMap<ProviderKind, Arc<dyn LlmProvider>>,
    mock: Arc<MockProvider>,
}

impl ProviderGateway {
    pub fn new(router: ModelRouter, credentials: &Credentials, mock_mode: bool) -> Self {
        let mut backends: HashMap<ProviderKind, Arc<dyn LlmProvider>> = HashMap::new();
        if let Some(endpoint) = &credentials.openai {
            backends.insert(
                ProviderKind::OpenAi,
                Arc::new(OpenAiProvider::new(endpoint.clone())),
            );
        }
        if let Some(endpoint) = &credentials.anthropic {
            backends.insert(
                ProviderKind::Anthropic,
                Arc::new(AnthropicProvider::new(endpoint.clone())),
            );
        }
        if let Some(endpoint) = &credentials.gemini {
            backends.insert(
                ProviderKind::Gemini,
                Arc::new(GeminiProvider::new(endpoint.clone())),
            );
        }

        if !mock_mode && backends.is_empty() {
            tracing::warn!(
                "no provider credentials configured; all models will use the mock provider"
            );
        }

        Self {
            router,
            mock_mode,
            backends,
            mock: Arc::new(MockProvider::new()),
        }
    }

    /// A gateway that answers everything from the mock backend.
    pub fn mock() -> Self {
        Self::new(ModelRouter::default(), &Credentials::default(), true)
    }

    pub fn is_mock_mode(&self) -> bool {
        self.mock_mode
    }

    /// Pick the backend for `model`.
    pub fn select(&self, model: &str) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        if self.mock_mode {
            return Ok(self.mock.clone());
        }

        let kind = self
            .router
            .resolve(model)
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if kind == ProviderKind::Mock {
            return Ok(self.mock.clone());
        }

        match self.backends.get(&kind) {
            Some(backend) => Ok(backend.clone()),
            None => {
                tracing::warn!(
                    model,
                    provider = %kind,
                    "no credentials for provider; using mock provider"
                );
                Ok(self.mock.clone())
            }
        }
    }
}

#[async_trait]
impl LlmProvider for ProviderGateway {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let backend = self.select(&request.options.model)?;
        tracing::debug!(
            model = %request.options.model,
            provider = backend.provider_name(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending completion request"
        );
        backend.complete(request).await
    }

    fn provider_name(&self) -> &str {
        "gateway"
    }
}
