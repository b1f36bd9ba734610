// ABOUTME: Pipeline orchestrator: runs stages in order, each through the shared policy helper.
// ABOUTME: Feeds each stage's output into the next stage's input and stops at the first failure.

use serde_json::{Map, Value, json};

use agentlang_core::PipelineDefinition;

use crate::context::{ExecutionContext, TaskInput};
use crate::error::RunError;
use crate::policy::{RetryPolicy, Runner, UnitOutput};

/// Input for the stage after `stage`: the initial fields, with `task` replaced
/// by the previous output, plus `previous` and the `stages` outputs so far.
pub fn next_stage_input(
    initial: &TaskInput,
    stage: &str,
    output: &Value,
    outputs: &Map<String, Value>,
) -> TaskInput {
    let mut next = initial.clone();
    next.insert("task".to_string(), output.clone());
    next.insert(
        "previous".to_string(),
        json!({"stage": stage, "output": output}),
    );
    next.insert("stages".to_string(), Value::Object(outputs.clone()));
    next
}

impl<'a> Runner<'a> {
    /// Run every stage of `pipeline` in order. Later stages never run after
    /// a stage fails past its policy.
    pub async fn run_pipeline(
        &self,
        pipeline: &'a PipelineDefinition,
        input: &TaskInput,
        ctx: &mut ExecutionContext,
    ) -> Result<UnitOutput, RunError> {
        tracing::info!(
            pipeline = %pipeline.name,
            stages = pipeline.stages.len(),
            "pipeline started"
        );

        let mut stage_input = input.clone();
        let mut outputs = Map::new();
        let mut last: Option<UnitOutput> = None;

        for stage in &pipeline.stages {
            let unit = self
                .unit(stage)
                .ok_or_else(|| RunError::UnknownTarget(stage.clone()))?;
            let policy = RetryPolicy::resolve(
                &[unit.declared_policy(), pipeline.on_error.as_ref()],
                ctx.config.default_retry,
            );
            let trace_before = ctx.trace().len();

            match self
                .run_with_policy(stage, unit, &stage_input, policy, ctx)
                .await
            {
                Ok(output) => {
                    tracing::debug!(
                        pipeline = %pipeline.name,
                        stage = %stage,
                        unit = %output.unit,
                        "stage finished"
                    );
                    outputs.insert(stage.clone(), output.output.clone());
                    stage_input = next_stage_input(input, stage, &output.output, &outputs);
                    last = Some(output);
                }
                Err(source) => {
                    let attempts = (ctx.trace().len() - trace_before) as u32;
                    tracing::error!(
                        pipeline = %pipeline.name,
                        stage = %stage,
                        attempts,
                        kind = source.innermost_kind(),
                        "stage failed; stopping pipeline"
                    );
                    return Err(RunError::PipelineStageFailure {
                        pipeline: pipeline.name.clone(),
                        stage: stage.clone(),
                        attempts,
                        source: Box::new(source),
                        report: Box::new(ctx.report()),
                    });
                }
            }
        }

        let last = last.ok_or_else(|| {
            RunError::Definition(agentlang_core::DefinitionError::EmptyPipeline(
                pipeline.name.clone(),
            ))
        })?;

        tracing::info!(pipeline = %pipeline.name, "pipeline finished");
        Ok(UnitOutput {
            unit: pipeline.name.clone(),
            output: last.output,
            model: last.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlang_core::{AgentDefinition, DefinitionRegistry, DefinitionSet, ErrorPolicy};

    use crate::config::EffectiveConfig;
    use crate::context::task_input;
    use crate::provider::ProviderError;
    use crate::testing::ScriptedProvider;

    #[test]
    fn stage_input_carries_previous_output() {
        let mut initial = task_input("Research Rust");
        initial.insert("audience".to_string(), json!("beginners"));

        let mut outputs = Map::new();
        outputs.insert("research".to_string(), json!("findings"));
        let next = next_stage_input(&initial, "research", &json!("findings"), &outputs);

        assert_eq!(next["task"], "findings");
        assert_eq!(next["audience"], "beginners");
        assert_eq!(next["previous"]["stage"], "research");
        assert_eq!(next["stages"]["research"], "findings");
    }

    fn registry(pipeline: PipelineDefinition) -> DefinitionRegistry {
        let set = DefinitionSet {
            agents: vec![
                AgentDefinition::new("research", "mock-research", "Research."),
                AgentDefinition::new("write", "mock-write", "Write."),
            ],
            pipelines: vec![pipeline],
            ..DefinitionSet::default()
        };
        DefinitionRegistry::builder(set).build().unwrap()
    }

    #[tokio::test]
    async fn stages_run_in_order_and_chain_outputs() {
        let registry = registry(PipelineDefinition::new("flow", &["research", "write"]));
        let provider = ScriptedProvider::new()
            .reply("mock-research", "facts about rust")
            .reply("mock-write", "an article");
        let runner = Runner::new(&registry, &provider);
        let mut ctx = ExecutionContext::new(EffectiveConfig::default());

        let output = runner
            .run_pipeline(registry.pipeline("flow").unwrap(), &task_input("Rust"), &mut ctx)
            .await
            .unwrap();

        assert_eq!(output.unit, "flow");
        assert_eq!(output.output, json!("an article"));
        assert_eq!(output.model.as_deref(), Some("mock-write"));

        let calls = provider.calls();
        assert_eq!(calls[0].messages[1].content, "Rust");
        assert_eq!(calls[1].messages[1].content, "facts about rust");
    }

    #[tokio::test]
    async fn pipeline_policy_applies_to_stages_without_their_own() {
        let pipeline = PipelineDefinition::new("flow", &["research", "write"])
            .with_policy(ErrorPolicy::retry(1));
        let registry = registry(pipeline);
        let provider = ScriptedProvider::new()
            .fail("mock-research", ProviderError::Unavailable("503".to_string()))
            .reply("mock-research", "facts")
            .always_fail("mock-write", ProviderError::Auth("401".to_string()));
        let runner = Runner::new(&registry, &provider);
        let mut ctx = ExecutionContext::new(EffectiveConfig::default());

        let err = runner
            .run_pipeline(registry.pipeline("flow").unwrap(), &task_input("Rust"), &mut ctx)
            .await
            .unwrap_err();

        match &err {
            RunError::PipelineStageFailure { stage, attempts, .. } => {
                assert_eq!(stage, "write");
                assert_eq!(*attempts, 2);
            }
            other => panic!("expected stage failure, got {other:?}"),
        }
        assert_eq!(err.innermost_kind(), "auth");
        assert_eq!(provider.calls_for("mock-research"), 2);
        assert_eq!(err.report().unwrap().trace.len(), 4);
    }
}
