// ABOUTME: Immutable registry of agents, tools, pipelines and handlers, validated on build.
// ABOUTME: Referential integrity, schemas, model routing and reference cycles are checked once here.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::definition::{
    AgentDefinition, DefinitionSet, GlobalConfig, PipelineDefinition, ToolDefinition,
};
use crate::error::DefinitionError;
use crate::handler::ToolHandler;
use crate::routing::{ModelRouter, ProviderKind};

/// Whether a run target names an agent or a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Agent,
    Pipeline,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Agent => f.write_str("agent"),
            TargetKind::Pipeline => f.write_str("pipeline"),
        }
    }
}

/// Read-only lookup of every definition plus global configuration.
///
/// Built once through [`RegistryBuilder`] and then shared by reference across
/// runs. There is no mutation API.
pub struct DefinitionRegistry {
    config: GlobalConfig,
    router: ModelRouter,
    agents: HashMap<String, AgentDefinition>,
    tools: HashMap<String, ToolDefinition>,
    pipelines: HashMap<String, PipelineDefinition>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl std::fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinitionRegistry")
            .field("agents", &sorted_keys(&self.agents))
            .field("tools", &sorted_keys(&self.tools))
            .field("pipelines", &sorted_keys(&self.pipelines))
            .field("handlers", &sorted_keys(&self.handlers))
            .finish()
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<&str> {
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

impl DefinitionRegistry {
    /// Start building a registry from a parsed definition set.
    pub fn builder(set: DefinitionSet) -> RegistryBuilder {
        RegistryBuilder {
            set,
            handlers: HashMap::new(),
            default_tools: Vec::new(),
        }
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub fn agent(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.get(name)
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineDefinition> {
        self.pipelines.get(name)
    }

    /// The handler registered for a tool, following its handler key.
    pub fn handler_for(&self, tool: &ToolDefinition) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(tool.handler_key()).cloned()
    }

    /// Tool definitions available to an agent, in the agent's declared order.
    pub fn tools_for(&self, agent: &AgentDefinition) -> Vec<ToolDefinition> {
        agent
            .tools
            .iter()
            .filter_map(|name| self.tools.get(name).cloned())
            .collect()
    }

    /// The provider family an agent's model routes to.
    pub fn provider_for(&self, agent: &AgentDefinition) -> Option<ProviderKind> {
        self.router.resolve(agent.model()).ok()
    }

    /// Classify a run target name.
    pub fn resolve_target(&self, name: &str) -> Option<TargetKind> {
        if self.pipelines.contains_key(name) {
            Some(TargetKind::Pipeline)
        } else if self.agents.contains_key(name) {
            Some(TargetKind::Agent)
        } else {
            None
        }
    }

    pub fn agent_names(&self) -> Vec<&str> {
        sorted_keys(&self.agents)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        sorted_keys(&self.tools)
    }

    pub fn pipeline_names(&self) -> Vec<&str> {
        sorted_keys(&self.pipelines)
    }
}

/// Collects a definition set, handlers and default tools, then validates.
pub struct RegistryBuilder {
    set: DefinitionSet,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    default_tools: Vec<ToolDefinition>,
}

impl RegistryBuilder {
    /// Register a handler under `key`. Tools select it through their handler key.
    pub fn handler(mut self, key: &str, handler: Arc<dyn ToolHandler>) -> Self {
        self.handlers.insert(key.to_string(), handler);
        self
    }

    /// Register a tool that is available unless the definition set declares
    /// a tool of the same name. The handler is registered under the tool name
    /// unless an explicit handler already claims that key.
    pub fn default_tool(mut self, tool: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Self {
        self.handlers.entry(tool.name.clone()).or_insert(handler);
        self.default_tools.push(tool);
        self
    }

    /// Validate everything and produce the immutable registry.
    pub fn build(self) -> Result<DefinitionRegistry, DefinitionError> {
        let RegistryBuilder {
            set,
            handlers,
            default_tools,
        } = self;
        let DefinitionSet {
            config,
            agents,
            tools,
            pipelines,
        } = set;

        for (name, value) in [
            ("max_iterations", u64::from(config.max_iterations)),
            ("provider_timeout_secs", config.provider_timeout_secs),
            ("tool_timeout_secs", config.tool_timeout_secs),
        ] {
            if value == 0 {
                return Err(DefinitionError::InvalidConfig(format!(
                    "{name} must be at least 1"
                )));
            }
        }

        let router = ModelRouter::new(&config.model_routes);
        // The default model must itself be routable, even if no agent uses it yet.
        router
            .resolve(&config.default_model)
            .map_err(|source| DefinitionError::Model {
                agent: "config.default_model".to_string(),
                source,
            })?;

        let tools = collect_tools(tools, default_tools, &handlers)?;
        let agents = collect_agents(agents, &config, &router, &tools)?;
        let pipelines = collect_pipelines(pipelines, &agents)?;

        check_fallbacks(&agents, &pipelines)?;
        check_cycles(&agents, &pipelines)?;

        tracing::info!(
            agents = agents.len(),
            tools = tools.len(),
            pipelines = pipelines.len(),
            "definition registry built"
        );

        Ok(DefinitionRegistry {
            config,
            router,
            agents,
            tools,
            pipelines,
            handlers,
        })
    }
}

fn collect_tools(
    declared: Vec<ToolDefinition>,
    defaults: Vec<ToolDefinition>,
    handlers: &HashMap<String, Arc<dyn ToolHandler>>,
) -> Result<HashMap<String, ToolDefinition>, DefinitionError> {
    let mut tools = HashMap::new();
    for tool in declared {
        if tools.contains_key(&tool.name) {
            return Err(DefinitionError::Duplicate {
                kind: "tool",
                name: tool.name,
            });
        }
        tools.insert(tool.name.clone(), tool);
    }
    for tool in defaults {
        tools.entry(tool.name.clone()).or_insert(tool);
    }

    for tool in tools.values() {
        validate_tool_schema(tool)?;
        if !handlers.contains_key(tool.handler_key()) {
            return Err(DefinitionError::UnresolvedHandler {
                tool: tool.name.clone(),
                handler: tool.handler_key().to_string(),
            });
        }
    }
    Ok(tools)
}

fn validate_tool_schema(tool: &ToolDefinition) -> Result<(), DefinitionError> {
    let mut seen = HashSet::new();
    for param in &tool.params {
        let invalid = |reason: &str| DefinitionError::InvalidParameter {
            tool: tool.name.clone(),
            param: param.name.clone(),
            reason: reason.to_string(),
        };

        if param.name.trim().is_empty() {
            return Err(invalid("parameter name is empty"));
        }
        if !seen.insert(param.name.as_str()) {
            return Err(DefinitionError::DuplicateParameter {
                tool: tool.name.clone(),
                param: param.name.clone(),
            });
        }
        if let Some(default) = &param.default {
            if param.required {
                return Err(invalid("a required parameter cannot declare a default"));
            }
            if param.ty.coerce(default).is_none() {
                return Err(invalid(&format!(
                    "default {} is not a valid {}",
                    default, param.ty
                )));
            }
        }
    }
    Ok(())
}

fn collect_agents(
    declared: Vec<AgentDefinition>,
    config: &GlobalConfig,
    router: &ModelRouter,
    tools: &HashMap<String, ToolDefinition>,
) -> Result<HashMap<String, AgentDefinition>, DefinitionError> {
    let mut agents = HashMap::new();
    for mut agent in declared {
        if agents.contains_key(&agent.name) {
            return Err(DefinitionError::Duplicate {
                kind: "agent",
                name: agent.name,
            });
        }

        if agent.model.is_none() {
            agent.model = Some(config.default_model.clone());
        }
        router
            .resolve(agent.model())
            .map_err(|source| DefinitionError::Model {
                agent: agent.name.clone(),
                source,
            })?;

        for tool in &agent.tools {
            if !tools.contains_key(tool) {
                return Err(DefinitionError::UnknownTool {
                    agent: agent.name.clone(),
                    tool: tool.clone(),
                });
            }
        }

        if let Some(temperature) = agent.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(DefinitionError::InvalidAgent {
                agent: agent.name.clone(),
                reason: format!("temperature {} is outside 0.0..=2.0", temperature),
            });
        }
        if agent.max_tokens == Some(0) {
            return Err(DefinitionError::InvalidAgent {
                agent: agent.name.clone(),
                reason: "max_tokens must be positive".to_string(),
            });
        }

        agents.insert(agent.name.clone(), agent);
    }
    Ok(agents)
}

fn collect_pipelines(
    declared: Vec<PipelineDefinition>,
    agents: &HashMap<String, AgentDefinition>,
) -> Result<HashMap<String, PipelineDefinition>, DefinitionError> {
    let mut pipelines: HashMap<String, PipelineDefinition> = HashMap::new();
    for pipeline in declared {
        if pipelines.contains_key(&pipeline.name) {
            return Err(DefinitionError::Duplicate {
                kind: "pipeline",
                name: pipeline.name,
            });
        }
        if agents.contains_key(&pipeline.name) {
            return Err(DefinitionError::NameCollision(pipeline.name));
        }
        if pipeline.stages.is_empty() {
            return Err(DefinitionError::EmptyPipeline(pipeline.name));
        }
        pipelines.insert(pipeline.name.clone(), pipeline);
    }

    for pipeline in pipelines.values() {
        for stage in &pipeline.stages {
            if !agents.contains_key(stage) && !pipelines.contains_key(stage) {
                return Err(DefinitionError::UnknownStage {
                    pipeline: pipeline.name.clone(),
                    stage: stage.clone(),
                });
            }
        }
    }
    Ok(pipelines)
}

fn check_fallbacks(
    agents: &HashMap<String, AgentDefinition>,
    pipelines: &HashMap<String, PipelineDefinition>,
) -> Result<(), DefinitionError> {
    let exists = |name: &str| agents.contains_key(name) || pipelines.contains_key(name);

    let owners = agents
        .values()
        .map(|a| (&a.name, &a.on_error))
        .chain(pipelines.values().map(|p| (&p.name, &p.on_error)));

    for (owner, policy) in owners {
        if let Some(fallback) = policy.as_ref().and_then(|p| p.fallback.as_ref())
            && !exists(fallback)
        {
            return Err(DefinitionError::UnknownFallback {
                owner: owner.clone(),
                fallback: fallback.clone(),
            });
        }
    }
    Ok(())
}

/// Reject cycles through pipeline stages and fallback references, which would
/// otherwise recurse without bound at run time.
fn check_cycles(
    agents: &HashMap<String, AgentDefinition>,
    pipelines: &HashMap<String, PipelineDefinition>,
) -> Result<(), DefinitionError> {
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for agent in agents.values() {
        let out = edges.entry(agent.name.as_str()).or_default();
        if let Some(fallback) = agent.on_error.as_ref().and_then(|p| p.fallback.as_deref()) {
            out.push(fallback);
        }
    }
    for pipeline in pipelines.values() {
        let out = edges.entry(pipeline.name.as_str()).or_default();
        out.extend(pipeline.stages.iter().map(String::as_str));
        if let Some(fallback) = pipeline
            .on_error
            .as_ref()
            .and_then(|p| p.fallback.as_deref())
        {
            out.push(fallback);
        }
    }
    // Stage-level fallbacks come from the stage agent's own policy, which the
    // agent edges above already cover.

    let nodes: BTreeSet<&str> = edges.keys().copied().collect();
    let mut done: HashSet<&str> = HashSet::new();
    for start in nodes {
        let mut path = Vec::new();
        visit(start, &edges, &mut path, &mut done)?;
    }
    Ok(())
}

fn visit<'a>(
    node: &'a str,
    edges: &HashMap<&'a str, Vec<&'a str>>,
    path: &mut Vec<&'a str>,
    done: &mut HashSet<&'a str>,
) -> Result<(), DefinitionError> {
    if done.contains(node) {
        return Ok(());
    }
    if let Some(pos) = path.iter().position(|n| *n == node) {
        let mut cycle: Vec<&str> = path[pos..].to_vec();
        cycle.push(node);
        return Err(DefinitionError::Cycle(cycle.join(" -> ")));
    }

    path.push(node);
    if let Some(next) = edges.get(node) {
        for target in next {
            visit(target, edges, path, done)?;
        }
    }
    path.pop();
    done.insert(node);
    Ok(())
}
