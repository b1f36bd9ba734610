// ABOUTME: Retry/fallback policy and the one attempt-with-policy helper shared by agents and stages.
// ABOUTME: Runs a unit up to retry+1 times, then its fallback, recording every agent attempt.

use futures::future::BoxFuture;
use serde_json::Value;

use agentlang_core::{AgentDefinition, DefinitionRegistry, ErrorPolicy, PipelineDefinition};

use crate::context::{ExecutionContext, TaskInput};
use crate::conversation::ConversationLoop;
use crate::error::{AttemptError, RunError};
use crate::provider::LlmProvider;
use crate::result::AttemptRecord;

/// Resolved retry/fallback policy for one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry: u32,
    pub fallback: Option<String>,
}

impl RetryPolicy {
    /// First declared policy among `layers` wins; otherwise `default_retry` with no fallback.
    pub fn resolve(layers: &[Option<&ErrorPolicy>], default_retry: u32) -> Self {
        match layers.iter().flatten().next() {
            Some(declared) => Self {
                retry: declared.retry,
                fallback: declared.fallback.clone(),
            },
            None => Self {
                retry: default_retry,
                fallback: None,
            },
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry.saturating_add(1)
    }
}

/// Something runnable in a stage slot.
#[derive(Debug, Clone, Copy)]
pub enum Unit<'a> {
    Agent(&'a AgentDefinition),
    Pipeline(&'a PipelineDefinition),
}

impl<'a> Unit<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            Unit::Agent(agent) => &agent.name,
            Unit::Pipeline(pipeline) => &pipeline.name,
        }
    }

    /// The policy the unit declares for itself. A pipeline's `on_error`
    /// governs its stages, not the pipeline as a whole.
    pub fn declared_policy(&self) -> Option<&'a ErrorPolicy> {
        match self {
            Unit::Agent(agent) => agent.on_error.as_ref(),
            Unit::Pipeline(_) => None,
        }
    }
}

/// What a unit produced.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutput {
    pub unit: String,
    pub output: Value,
    pub model: Option<String>,
}

/// Executes units against a registry and provider, folding results into a run context.
pub struct Runner<'a> {
    pub(crate) registry: &'a DefinitionRegistry,
    pub(crate) provider: &'a dyn LlmProvider,
}

impl<'a> Runner<'a> {
    pub fn new(registry: &'a DefinitionRegistry, provider: &'a dyn LlmProvider) -> Self {
        Self { registry, provider }
    }

    /// Look up an agent or pipeline by name. Pipelines are checked first.
    pub fn unit(&self, name: &str) -> Option<Unit<'a>> {
        let registry: &'a DefinitionRegistry = self.registry;
        registry
            .pipeline(name)
            .map(Unit::Pipeline)
            .or_else(|| registry.agent(name).map(Unit::Agent))
    }

    /// Run `unit` in the slot `stage` under `policy`: up to `retry + 1`
    /// attempts with the same input, then the fallback (under its own
    /// declared policy) if one is named. The last failure propagates.
    pub fn run_with_policy<'r>(
        &'r self,
        stage: &'r str,
        unit: Unit<'a>,
        input: &'r TaskInput,
        policy: RetryPolicy,
        ctx: &'r mut ExecutionContext,
    ) -> BoxFuture<'r, Result<UnitOutput, RunError>> {
        Box::pin(async move {
            let max_attempts = policy.max_attempts();
            let mut attempt = 1;
            let failure = loop {
                match self.attempt(stage, unit, input, attempt, ctx).await {
                    Ok(output) => return Ok(output),
                    Err(err) if attempt < max_attempts => {
                        tracing::warn!(
                            stage,
                            unit = unit.name(),
                            attempt,
                            max_attempts,
                            kind = err.innermost_kind(),
                            "attempt failed; retrying"
                        );
                        attempt += 1;
                    }
                    Err(err) => break err,
                }
            };

            let Some(fallback_name) = policy.fallback else {
                return Err(failure);
            };
            let fallback = self
                .unit(&fallback_name)
                .ok_or_else(|| RunError::UnknownTarget(fallback_name.clone()))?;

            tracing::info!(
                stage,
                unit = unit.name(),
                fallback = fallback.name(),
                kind = failure.innermost_kind(),
                "attempts exhausted; running fallback"
            );
            let fallback_policy =
                RetryPolicy::resolve(&[fallback.declared_policy()], ctx.config.default_retry);
            self.run_with_policy(stage, fallback, input, fallback_policy, ctx)
                .await
        })
    }

    /// One attempt of `unit`. Agent attempts are recorded in the trace.
    async fn attempt(
        &self,
        stage: &str,
        unit: Unit<'a>,
        input: &TaskInput,
        attempt: u32,
        ctx: &mut ExecutionContext,
    ) -> Result<UnitOutput, RunError> {
        match unit {
            Unit::Agent(agent) => self.attempt_agent(stage, agent, input, attempt, ctx).await,
            Unit::Pipeline(pipeline) => self.run_pipeline(pipeline, input, ctx).await,
        }
    }

    async fn attempt_agent(
        &self,
        stage: &str,
        agent: &'a AgentDefinition,
        input: &TaskInput,
        attempt: u32,
        ctx: &mut ExecutionContext,
    ) -> Result<UnitOutput, RunError> {
        let outcome = ConversationLoop::new(self.registry, self.provider, ctx.config)
            .run(agent, input)
            .await;

        ctx.record(AttemptRecord {
            stage: stage.to_string(),
            unit: agent.name.clone(),
            attempt,
            success: outcome.result.is_ok(),
            error_kind: outcome.result.as_ref().err().map(|e| e.kind().to_string()),
            error: outcome.result.as_ref().err().map(AttemptError::to_string),
            usage: outcome.usage,
            provider_calls: outcome.provider_calls,
        });

        match outcome.result {
            Ok(text) => {
                tracing::info!(
                    stage,
                    agent = %agent.name,
                    attempt,
                    provider_calls = outcome.provider_calls,
                    tokens = outcome.usage.total(),
                    "agent attempt succeeded"
                );
                Ok(UnitOutput {
                    unit: agent.name.clone(),
                    output: Value::String(text),
                    model: Some(outcome.model),
                })
            }
            Err(source) => Err(RunError::UnitFailed {
                unit: agent.name.clone(),
                attempts: attempt,
                source,
                report: Box::new(ctx.report()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlang_core::DefinitionSet;

    use crate::config::EffectiveConfig;
    use crate::context::task_input;
    use crate::provider::ProviderError;
    use crate::testing::ScriptedProvider;

    #[test]
    fn first_declared_layer_wins() {
        let stage = ErrorPolicy::retry(2).with_fallback("backup");
        let pipeline = ErrorPolicy::retry(5);

        let policy = RetryPolicy::resolve(&[Some(&stage), Some(&pipeline)], 1);
        assert_eq!(policy.retry, 2);
        assert_eq!(policy.fallback.as_deref(), Some("backup"));
        assert_eq!(policy.max_attempts(), 3);

        let policy = RetryPolicy::resolve(&[None, Some(&pipeline)], 1);
        assert_eq!(policy.retry, 5);
        assert!(policy.fallback.is_none());

        let policy = RetryPolicy::resolve(&[None, None], 1);
        assert_eq!(policy, RetryPolicy { retry: 1, fallback: None });
    }

    fn registry() -> DefinitionRegistry {
        let set = DefinitionSet {
            agents: vec![
                AgentDefinition::new("primary", "mock-primary", "")
                    .with_policy(ErrorPolicy::retry(2).with_fallback("backup")),
                AgentDefinition::new("backup", "mock-backup", ""),
                AgentDefinition::new("flaky", "mock-flaky", ""),
            ],
            ..DefinitionSet::default()
        };
        DefinitionRegistry::builder(set).build().unwrap()
    }

    #[tokio::test]
    async fn retries_until_success() {
        let registry = registry();
        let provider = ScriptedProvider::new()
            .fail("mock-flaky", ProviderError::Timeout("slow".to_string()))
            .reply("mock-flaky", "made it");
        let runner = Runner::new(&registry, &provider);
        let mut ctx = ExecutionContext::new(EffectiveConfig::default());

        let unit = runner.unit("flaky").unwrap();
        let output = runner
            .run_with_policy(
                "flaky",
                unit,
                &task_input("go"),
                RetryPolicy { retry: 1, fallback: None },
                &mut ctx,
            )
            .await
            .unwrap();

        assert_eq!(output.output, Value::String("made it".to_string()));
        let attempts: Vec<(u32, bool)> =
            ctx.trace().iter().map(|r| (r.attempt, r.success)).collect();
        assert_eq!(attempts, vec![(1, false), (2, true)]);
    }

    #[tokio::test]
    async fn exhausted_retries_run_the_fallback() {
        let registry = registry();
        let provider = ScriptedProvider::new()
            .always_fail("mock-primary", ProviderError::RateLimited("429".to_string()))
            .reply("mock-backup", "from backup");
        let runner = Runner::new(&registry, &provider);
        let mut ctx = ExecutionContext::new(EffectiveConfig::default());

        let unit = runner.unit("primary").unwrap();
        let policy = RetryPolicy::resolve(&[unit.declared_policy()], 0);
        let output = runner
            .run_with_policy("primary", unit, &task_input("go"), policy, &mut ctx)
            .await
            .unwrap();

        assert_eq!(output.unit, "backup");
        assert_eq!(output.model.as_deref(), Some("mock-backup"));
        assert_eq!(provider.calls_for("mock-primary"), 3);
        assert_eq!(ctx.trace().len(), 4);
        assert!(ctx.trace().iter().all(|r| r.stage == "primary"));
        assert_eq!(ctx.trace()[3].unit, "backup");
    }

    #[tokio::test]
    async fn failure_without_fallback_reports_attempts() {
        let registry = registry();
        let provider = ScriptedProvider::new()
            .always_fail("mock-flaky", ProviderError::Auth("401".to_string()));
        let runner = Runner::new(&registry, &provider);
        let mut ctx = ExecutionContext::new(EffectiveConfig::default());

        let unit = runner.unit("flaky").unwrap();
        let err = runner
            .run_with_policy(
                "flaky",
                unit,
                &task_input("go"),
                RetryPolicy { retry: 2, fallback: None },
                &mut ctx,
            )
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 3);
        assert_eq!(err.innermost_kind(), "auth");
        assert_eq!(err.report().unwrap().trace.len(), 3);
    }
}
