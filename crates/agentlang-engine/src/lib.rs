// ABOUTME: Execution engine for agentlang: providers, tool dispatch, conversation loop and pipelines.
// ABOUTME: The Engine type is the entry point; lower layers are public for embedding and tests.

pub mod builtin;
pub mod config;
pub mod context;
pub mod conversation;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod message;
pub mod pipeline;
pub mod policy;
pub mod provider;
pub mod providers;
pub mod result;
pub mod testing;

pub use config::{ConfigError, EffectiveConfig, EnvOverrides, RunOptions};
pub use context::{Bindings, ExecutionContext, TaskInput, task_input, task_text};
pub use conversation::{AgentRunOutcome, ConversationLoop};
pub use dispatcher::{ToolDispatchError, ToolDispatcher, validate_arguments};
pub use engine::Engine;
pub use error::{AttemptError, RunError};
pub use gateway::ProviderGateway;
pub use message::{Conversation, Message, Role, ToolCall, ToolResult};
pub use policy::{RetryPolicy, Runner, Unit, UnitOutput};
pub use provider::{
    CompletionOptions, CompletionRequest, CompletionResponse, LlmProvider, ProviderError, Usage,
};
pub use providers::{ApiEndpoint, Credentials};
pub use result::{AttemptRecord, FailureReport, RunResult};
