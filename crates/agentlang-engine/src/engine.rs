// ABOUTME: The Engine facade: resolves configuration and bindings, then runs an agent or pipeline.
// ABOUTME: Owns the shared registry and provider selection; each run gets its own ExecutionContext.

use std::sync::Arc;

use serde_json::{Value, json};

use agentlang_core::{DefinitionRegistry, TargetKind};

use crate::config::{EffectiveConfig, EnvOverrides, RunOptions};
use crate::context::{Bindings, ExecutionContext, TaskInput};
use crate::error::RunError;
use crate::gateway::ProviderGateway;
use crate::policy::{RetryPolicy, Runner, Unit};
use crate::provider::LlmProvider;
use crate::providers::Credentials;
use crate::result::RunResult;

/// Runs definitions from one registry.
///
/// Runs are independent: state lives in a per-run [`ExecutionContext`], so a
/// shared `&Engine` can drive several runs concurrently. Variable bindings
/// are the only state kept between runs.
pub struct Engine {
    registry: Arc<DefinitionRegistry>,
    provider: Option<Arc<dyn LlmProvider>>,
    credentials: Credentials,
    env: EnvOverrides,
    bindings: Bindings,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("fixed_provider", &self.provider.as_ref().map(|p| p.provider_name().to_string()))
            .field("env", &self.env)
            .finish()
    }
}

impl Engine {
    /// Engine using provider credentials and overrides from the environment.
    pub fn new(registry: Arc<DefinitionRegistry>) -> Result<Self, RunError> {
        let env = EnvOverrides::from_env()?;
        Ok(Self::with_credentials(registry, Credentials::from_env()).with_env_overrides(env))
    }

    /// Engine routing through a gateway built from `credentials`.
    pub fn with_credentials(registry: Arc<DefinitionRegistry>, credentials: Credentials) -> Self {
        Self {
            registry,
            provider: None,
            credentials,
            env: EnvOverrides::default(),
            bindings: Bindings::default(),
        }
    }

    /// Engine sending every completion to `provider`, except in mock mode.
    pub fn with_provider(
        registry: Arc<DefinitionRegistry>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            provider: Some(provider),
            ..Self::with_credentials(registry, Credentials::default())
        }
    }

    pub fn with_env_overrides(mut self, env: EnvOverrides) -> Self {
        self.env = env;
        self
    }

    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    /// Bind `name` so later run inputs can reference it as `name` or `name.path`.
    pub fn bind_variable(&mut self, name: &str, value: Value) {
        self.bindings.bind(name, value);
    }

    /// Bind a finished run. Its fields are reachable as `name.output`,
    /// `name.model`, `name.usage.total_tokens` and so on.
    pub fn bind_result(&mut self, name: &str, result: &RunResult) {
        let value = json!({
            "run_id": result.run_id.to_string(),
            "target": result.target,
            "kind": result.kind.to_string(),
            "output": result.output,
            "model": result.model,
            "provider_calls": result.provider_calls,
            "usage": {
                "prompt_tokens": result.usage.prompt_tokens,
                "completion_tokens": result.usage.completion_tokens,
                "total_tokens": result.usage.total(),
            },
        });
        self.bindings.bind(name, value);
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub async fn run_agent(&self, name: &str, input: TaskInput) -> Result<RunResult, RunError> {
        self.run_as(name, Some(TargetKind::Agent), input, &RunOptions::default())
            .await
    }

    pub async fn run_agent_with(
        &self,
        name: &str,
        input: TaskInput,
        options: &RunOptions,
    ) -> Result<RunResult, RunError> {
        self.run_as(name, Some(TargetKind::Agent), input, options).await
    }

    pub async fn run_pipeline(&self, name: &str, input: TaskInput) -> Result<RunResult, RunError> {
        self.run_as(name, Some(TargetKind::Pipeline), input, &RunOptions::default())
            .await
    }

    pub async fn run_pipeline_with(
        &self,
        name: &str,
        input: TaskInput,
        options: &RunOptions,
    ) -> Result<RunResult, RunError> {
        self.run_as(name, Some(TargetKind::Pipeline), input, options)
            .await
    }

    /// Run whichever agent or pipeline is called `target`.
    pub async fn run(
        &self,
        target: &str,
        input: TaskInput,
        options: &RunOptions,
    ) -> Result<RunResult, RunError> {
        self.run_as(target, None, input, options).await
    }

    async fn run_as(
        &self,
        target: &str,
        expected: Option<TargetKind>,
        input: TaskInput,
        options: &RunOptions,
    ) -> Result<RunResult, RunError> {
        let kind = self
            .registry
            .resolve_target(target)
            .filter(|kind| expected.is_none_or(|want| want == *kind))
            .ok_or_else(|| RunError::UnknownTarget(target.to_string()))?;

        let config = EffectiveConfig::resolve(self.registry.config(), &self.env, options)?;
        let input = self.bindings.resolve_input(&input);
        let provider = self.provider_for(&config);
        let runner = Runner::new(&self.registry, provider.as_ref());
        let mut ctx = ExecutionContext::new(config);

        tracing::info!(
            run_id = %ctx.run_id,
            name = %target,
            kind = %kind,
            mock = config.mock,
            max_iterations = config.max_iterations,
            "run started"
        );

        let outcome = match kind {
            TargetKind::Agent => {
                let agent = self
                    .registry
                    .agent(target)
                    .ok_or_else(|| RunError::UnknownTarget(target.to_string()))?;
                let policy =
                    RetryPolicy::resolve(&[agent.on_error.as_ref()], config.default_retry);
                runner
                    .run_with_policy(target, Unit::Agent(agent), &input, policy, &mut ctx)
                    .await
            }
            TargetKind::Pipeline => {
                let pipeline = self
                    .registry
                    .pipeline(target)
                    .ok_or_else(|| RunError::UnknownTarget(target.to_string()))?;
                runner.run_pipeline(pipeline, &input, &mut ctx).await
            }
        };

        match outcome {
            Ok(output) => {
                let result = ctx.finish(target, kind, output.output, output.model);
                tracing::info!(
                    run_id = %result.run_id,
                    name = %target,
                    provider_calls = result.provider_calls,
                    prompt_tokens = result.usage.prompt_tokens,
                    completion_tokens = result.usage.completion_tokens,
                    "run finished"
                );
                Ok(result)
            }
            Err(err) => {
                tracing::error!(
                    run_id = %ctx.run_id,
                    name = %target,
                    kind = err.innermost_kind(),
                    provider_calls = ctx.provider_calls(),
                    "run failed: {}",
                    err.summary()
                );
                Err(err.with_report(ctx.report()))
            }
        }
    }

    fn provider_for(&self, config: &EffectiveConfig) -> Arc<dyn LlmProvider> {
        if config.mock {
            return Arc::new(ProviderGateway::mock());
        }
        match &self.provider {
            Some(provider) => provider.clone(),
            None => Arc::new(ProviderGateway::new(
                self.registry.router().clone(),
                &self.credentials,
                false,
            )),
        }
    }
}
