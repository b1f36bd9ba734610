// ABOUTME: Core library for agentlang, containing definition types, routing and the registry.
// ABOUTME: This crate defines the immutable definition model shared by the engine and the CLI.

pub mod definition;
pub mod error;
pub mod handler;
pub mod registry;
pub mod routing;

pub use definition::{
    AgentDefinition, DefinitionSet, ErrorPolicy, GlobalConfig, ParamSpec, ParamType,
    PipelineDefinition, ToolDefinition,
};
pub use error::DefinitionError;
pub use handler::{FnHandler, ToolArgs, ToolHandler, handler_fn};
pub use registry::{DefinitionRegistry, RegistryBuilder, TargetKind};
pub use routing::{ModelRoute, ModelRouter, ProviderKind, RouteError};
