// ABOUTME: Maps model identifiers onto a closed set of provider families by prefix.
// ABOUTME: Routing is a pure function; unmatched or ambiguous identifiers are errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The language-model backends the engine knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "mock")]
    Mock,
}

impl ProviderKind {
    /// Return the lowercase label used in logs and configuration.
    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Mock => "mock",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A single prefix rule: model identifiers starting with `prefix` go to `provider`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRoute {
    pub prefix: String,
    pub provider: ProviderKind,
}

const BUILTIN_ROUTES: &[(&str, ProviderKind)] = &[
    ("gpt", ProviderKind::OpenAi),
    ("chatgpt", ProviderKind::OpenAi),
    ("o1", ProviderKind::OpenAi),
    ("o3", ProviderKind::OpenAi),
    ("o4", ProviderKind::OpenAi),
    ("claude", ProviderKind::Anthropic),
    ("gemini", ProviderKind::Gemini),
    ("mock", ProviderKind::Mock),
];

/// Why a model identifier could not be routed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RouteError {
    #[error("model '{0}' does not match any provider family")]
    Unmatched(String),

    #[error("model '{model}' matches more than one provider family ({})", join_kinds(.providers))]
    Ambiguous {
        model: String,
        providers: Vec<ProviderKind>,
    },
}

fn join_kinds(kinds: &[ProviderKind]) -> String {
    kinds
        .iter()
        .map(ProviderKind::label)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Prefix router from model identifier to provider family.
///
/// Matching is case-insensitive. An identifier that matches prefixes of two
/// different providers is ambiguous; matching several prefixes of the same
/// provider is fine.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    routes: Vec<ModelRoute>,
}

impl ModelRouter {
    /// Build a router from the built-in families plus any configured extras.
    pub fn new(extra: &[ModelRoute]) -> Self {
        let mut routes: Vec<ModelRoute> = BUILTIN_ROUTES
            .iter()
            .map(|(prefix, provider)| ModelRoute {
                prefix: (*prefix).to_string(),
                provider: *provider,
            })
            .collect();
        routes.extend(extra.iter().map(|route| ModelRoute {
            prefix: route.prefix.trim().to_ascii_lowercase(),
            provider: route.provider,
        }));
        Self { routes }
    }

    /// Resolve a model identifier to exactly one provider family.
    pub fn resolve(&self, model: &str) -> Result<ProviderKind, RouteError> {
        let normalized = model.trim().to_ascii_lowercase();
        let mut matched: Vec<ProviderKind> = self
            .routes
            .iter()
            .filter(|route| !route.prefix.is_empty() && normalized.starts_with(&route.prefix))
            .map(|route| route.provider)
            .collect();
        matched.sort();
        matched.dedup();

        match matched.as_slice() {
            [] => Err(RouteError::Unmatched(model.to_string())),
            [only] => Ok(*only),
            _ => Err(RouteError::Ambiguous {
                model: model.to_string(),
                providers: matched,
            }),
        }
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_families_route_by_prefix() {
        let router = ModelRouter::default();
        assert_eq!(router.resolve("gpt-4").unwrap(), ProviderKind::OpenAi);
        assert_eq!(router.resolve("gpt-3.5-turbo").unwrap(), ProviderKind::OpenAi);
        assert_eq!(router.resolve("o1-preview").unwrap(), ProviderKind::OpenAi);
        assert_eq!(router.resolve("claude-3-opus").unwrap(), ProviderKind::Anthropic);
        assert_eq!(router.resolve("Claude-Sonnet-4").unwrap(), ProviderKind::Anthropic);
        assert_eq!(router.resolve("gemini-2.0-flash").unwrap(), ProviderKind::Gemini);
        assert_eq!(router.resolve("mock-small").unwrap(), ProviderKind::Mock);
    }

    #[test]
    fn unknown_model_is_unmatched() {
        let router = ModelRouter::default();
        let err = router.resolve("llama-3-70b").unwrap_err();
        assert_eq!(err, RouteError::Unmatched("llama-3-70b".to_string()));
    }

    #[test]
    fn extra_route_adds_a_family_member() {
        let router = ModelRouter::new(&[ModelRoute {
            prefix: "Sonnet".to_string(),
            provider: ProviderKind::Anthropic,
        }]);
        assert_eq!(router.resolve("sonnet-4").unwrap(), ProviderKind::Anthropic);
    }

    #[test]
    fn overlapping_routes_for_different_providers_are_ambiguous() {
        let router = ModelRouter::new(&[ModelRoute {
            prefix: "gpt-claude".to_string(),
            provider: ProviderKind::Anthropic,
        }]);
        let err = router.resolve("gpt-claude-hybrid").unwrap_err();
        match err {
            RouteError::Ambiguous { providers, .. } => {
                assert_eq!(providers, vec![ProviderKind::OpenAi, ProviderKind::Anthropic]);
            }
            other => panic!("expected Ambiguous, got {:?}", other),
        }
        // The plain family still routes.
        assert_eq!(router.resolve("gpt-4o").unwrap(), ProviderKind::OpenAi);
    }

    #[test]
    fn overlapping_routes_for_same_provider_are_fine() {
        let router = ModelRouter::new(&[ModelRoute {
            prefix: "gpt-4".to_string(),
            provider: ProviderKind::OpenAi,
        }]);
        assert_eq!(router.resolve("gpt-4o").unwrap(), ProviderKind::OpenAi);
    }

    #[test]
    fn provider_kind_serde_uses_labels() {
        let json = serde_json::to_string(&ProviderKind::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
        let parsed: ProviderKind = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(parsed, ProviderKind::Anthropic);
    }
}
