// ABOUTME: The multi-turn conversation loop that runs one agent attempt to a terminal state.
// ABOUTME: Alternates provider completions and tool dispatch under an iteration cap, summing usage.

use agentlang_core::{AgentDefinition, DefinitionRegistry};

use crate::config::EffectiveConfig;
use crate::context::{TaskInput, task_text};
use crate::dispatcher::ToolDispatcher;
use crate::error::AttemptError;
use crate::message::{Conversation, ToolCall};
use crate::provider::{
    CompletionOptions, CompletionRequest, CompletionResponse, LlmProvider, ProviderError, Usage,
};

/// Everything one agent attempt produced, whether or not it succeeded.
#[derive(Debug)]
pub struct AgentRunOutcome {
    pub result: Result<String, AttemptError>,
    pub model: String,
    pub usage: Usage,
    pub provider_calls: u32,
    pub transcript_len: usize,
}

enum LoopState {
    AwaitingCompletion,
    ExecutingTools(Vec<ToolCall>),
    Done(String),
    IterationLimitExceeded,
    Fatal(ProviderError),
}

/// Drives a single agent attempt against a provider and the registry's tools.
pub struct ConversationLoop<'a> {
    registry: &'a DefinitionRegistry,
    provider: &'a dyn LlmProvider,
    config: EffectiveConfig,
}

impl<'a> ConversationLoop<'a> {
    pub fn new(
        registry: &'a DefinitionRegistry,
        provider: &'a dyn LlmProvider,
        config: EffectiveConfig,
    ) -> Self {
        Self {
            registry,
            provider,
            config,
        }
    }

    /// Run `agent` on `input` with a fresh conversation until it finishes,
    /// hits the iteration cap, or a provider call fails.
    pub async fn run(&self, agent: &'a AgentDefinition, input: &TaskInput) -> AgentRunOutcome {
        let options = CompletionOptions {
            model: agent.model().to_string(),
            temperature: agent.temperature.unwrap_or(self.config.default_temperature),
            max_tokens: agent.max_tokens.unwrap_or(self.config.default_max_tokens),
        };
        let tools = self.registry.tools_for(agent);
        let dispatcher = ToolDispatcher::for_agent(self.registry, agent, self.config.tool_timeout);
        let cap = self.config.max_iterations;

        let mut conversation = Conversation::new(&agent.prompt, &task_text(input));
        let mut usage = Usage::default();
        let mut provider_calls = 0u32;
        let mut state = LoopState::AwaitingCompletion;

        tracing::debug!(
            agent = %agent.name,
            model = %options.model,
            tools = tools.len(),
            "agent attempt started"
        );

        let result = loop {
            state = match state {
                LoopState::AwaitingCompletion if provider_calls >= cap => {
                    LoopState::IterationLimitExceeded
                }
                LoopState::AwaitingCompletion => {
                    provider_calls += 1;
                    let request = CompletionRequest {
                        messages: conversation.messages().to_vec(),
                        tools: tools.clone(),
                        options: options.clone(),
                    };
                    match self.complete(&request).await {
                        Ok(response) => {
                            usage.add(response.usage);
                            if response.has_tool_calls() {
                                conversation.push_tool_calls(
                                    response.text.as_deref(),
                                    response.tool_calls.clone(),
                                );
                                LoopState::ExecutingTools(response.tool_calls)
                            } else {
                                let text = response.text.unwrap_or_default();
                                conversation.push_assistant(&text);
                                LoopState::Done(text)
                            }
                        }
                        Err(err) => LoopState::Fatal(err),
                    }
                }
                LoopState::ExecutingTools(calls) => {
                    tracing::debug!(
                        agent = %agent.name,
                        calls = calls.len(),
                        "dispatching tool calls"
                    );
                    let mut next = LoopState::AwaitingCompletion;
                    for result in dispatcher.invoke_all(&calls).await {
                        if let Err(err) = conversation.push_tool_result(&result) {
                            next = LoopState::Fatal(ProviderError::MalformedResponse(
                                err.to_string(),
                            ));
                            break;
                        }
                    }
                    next
                }
                LoopState::Done(text) => break Ok(text),
                LoopState::IterationLimitExceeded => {
                    break Err(AttemptError::IterationLimitExceeded {
                        agent: agent.name.clone(),
                        cap,
                    });
                }
                LoopState::Fatal(err) => break Err(AttemptError::Provider(err)),
            };
        };

        AgentRunOutcome {
            result,
            model: options.model,
            usage,
            provider_calls,
            transcript_len: conversation.len(),
        }
    }

    /// One provider call under the configured timeout, with structural validation.
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let timeout = self.config.provider_timeout;
        let response = tokio::time::timeout(timeout, self.provider.complete(request))
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!("no response within {}s", timeout.as_secs()))
            })??;
        response.validate()?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use agentlang_core::{DefinitionSet, ParamSpec, ParamType, ToolDefinition, handler_fn};
    use serde_json::{Value, json};

    use crate::context::task_input;
    use crate::message::Role;
    use crate::testing::ScriptedProvider;

    fn registry() -> DefinitionRegistry {
        let set = DefinitionSet {
            agents: vec![
                AgentDefinition::new("greeter", "mock-greeter", "You greet people."),
                AgentDefinition::new("calc", "mock-calc", "You do math.").with_tools(&["double"]),
            ],
            tools: vec![ToolDefinition::new(
                "double",
                "Double an integer",
                vec![ParamSpec::required("x", ParamType::Int)],
            )],
            ..DefinitionSet::default()
        };
        DefinitionRegistry::builder(set)
            .handler(
                "double",
                handler_fn(|args| {
                    let x = args.get("x").and_then(Value::as_i64).unwrap_or_default();
                    Ok(json!(x * 2))
                }),
            )
            .build()
            .unwrap()
    }

    fn config(cap: u32) -> EffectiveConfig {
        EffectiveConfig {
            max_iterations: cap,
            ..EffectiveConfig::default()
        }
    }

    #[tokio::test]
    async fn no_tool_agent_finishes_in_one_call() {
        let registry = registry();
        let provider = ScriptedProvider::new().reply("mock-greeter", "Hello!");
        let agent = registry.agent("greeter").unwrap();

        let outcome = ConversationLoop::new(&registry, &provider, config(10))
            .run(agent, &task_input("Say hello"))
            .await;

        assert_eq!(outcome.result.unwrap(), "Hello!");
        assert_eq!(outcome.provider_calls, 1);
        assert_eq!(outcome.transcript_len, 3);
        assert_eq!(provider.call_count(), 1);

        let sent = &provider.calls()[0];
        assert_eq!(sent.messages[0].role, Role::System);
        assert_eq!(sent.messages[1].content, "Say hello");
        assert!(sent.tools.is_empty());
    }

    #[tokio::test]
    async fn tool_results_are_fed_back_in_call_order() {
        let registry = registry();
        let provider = ScriptedProvider::new()
            .tool_calls(
                "mock-calc",
                vec![
                    ToolCall::new("c1", "double", json!({"x": 2})),
                    ToolCall::new("c2", "double", json!({"x": "5"})),
                ],
            )
            .reply("mock-calc", "4 and 10");
        let agent = registry.agent("calc").unwrap();

        let outcome = ConversationLoop::new(&registry, &provider, config(10))
            .run(agent, &task_input("Double 2 and 5"))
            .await;

        assert_eq!(outcome.result.unwrap(), "4 and 10");
        assert_eq!(outcome.provider_calls, 2);
        assert_eq!(outcome.usage, Usage::new(20, 10));

        let second = &provider.calls()[1];
        let tool_turns: Vec<_> = second
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(tool_turns.len(), 2);
        assert_eq!(tool_turns[0].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(tool_turns[0].content, "4");
        assert_eq!(tool_turns[1].content, "10");
        assert_eq!(second.tools.len(), 1);
    }

    #[tokio::test]
    async fn iteration_cap_bounds_provider_calls() {
        let registry = registry();
        let provider = ScriptedProvider::new().always_tool_call(
            "mock-calc",
            "double",
            json!({"x": 1}),
        );
        let agent = registry.agent("calc").unwrap();

        let outcome = ConversationLoop::new(&registry, &provider, config(3))
            .run(agent, &task_input("loop forever"))
            .await;

        assert!(matches!(
            outcome.result,
            Err(AttemptError::IterationLimitExceeded { cap: 3, .. })
        ));
        assert_eq!(outcome.provider_calls, 3);
        assert_eq!(provider.call_count(), 3);
        assert_eq!(outcome.usage, Usage::new(30, 15));
    }

    #[tokio::test]
    async fn provider_failure_is_fatal_but_keeps_usage() {
        let registry = registry();
        let provider = ScriptedProvider::new()
            .tool_call("mock-calc", "double", json!({"x": 1}))
            .fail("mock-calc", ProviderError::RateLimited("429".to_string()));
        let agent = registry.agent("calc").unwrap();

        let outcome = ConversationLoop::new(&registry, &provider, config(10))
            .run(agent, &task_input("go"))
            .await;

        assert_eq!(
            outcome.result,
            Err(AttemptError::Provider(ProviderError::RateLimited("429".to_string())))
        );
        assert_eq!(outcome.provider_calls, 2);
        assert_eq!(outcome.usage, Usage::new(10, 5));
    }

    #[tokio::test]
    async fn duplicate_call_ids_are_malformed() {
        let registry = registry();
        let provider = ScriptedProvider::new().tool_calls(
            "mock-calc",
            vec![
                ToolCall::new("dup", "double", json!({"x": 1})),
                ToolCall::new("dup", "double", json!({"x": 2})),
            ],
        );
        let agent = registry.agent("calc").unwrap();

        let outcome = ConversationLoop::new(&registry, &provider, config(10))
            .run(agent, &task_input("go"))
            .await;

        assert_eq!(outcome.result.unwrap_err().kind(), "malformed_response");
    }

    #[tokio::test]
    async fn call_ids_reused_by_later_completions_are_accepted() {
        let registry = registry();
        let provider = ScriptedProvider::new()
            .tool_calls("mock-calc", vec![ToolCall::new("call_0", "double", json!({"x": 1}))])
            .tool_calls("mock-calc", vec![ToolCall::new("call_0", "double", json!({"x": 2}))])
            .reply("mock-calc", "2 then 4");
        let agent = registry.agent("calc").unwrap();

        let outcome = ConversationLoop::new(&registry, &provider, config(10))
            .run(agent, &task_input("go"))
            .await;

        assert_eq!(outcome.result.unwrap(), "2 then 4");
        assert_eq!(outcome.provider_calls, 3);
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let registry = registry();
        let provider = ScriptedProvider::new()
            .reply("mock-greeter", "late")
            .with_delay(Duration::from_millis(200));
        let agent = registry.agent("greeter").unwrap();

        let config = EffectiveConfig {
            provider_timeout: Duration::from_millis(20),
            ..EffectiveConfig::default()
        };
        let outcome = ConversationLoop::new(&registry, &provider, config)
            .run(agent, &task_input("hi"))
            .await;

        assert_eq!(outcome.result.unwrap_err().kind(), "timeout");
        assert_eq!(outcome.provider_calls, 1);
    }
}
