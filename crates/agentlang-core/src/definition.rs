// ABOUTME: Definition types for agents, tools, pipelines and global configuration.
// ABOUTME: All types deserialize from a YAML definition set and are immutable once registered.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};

use crate::error::DefinitionError;
use crate::routing::ModelRoute;

const DEFAULT_MODEL: &str = "gpt-4";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 2000;
const DEFAULT_MAX_ITERATIONS: u32 = 10;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 60;

/// Floats in `I64_MIN_F64..I64_END_F64` convert to `i64` without saturating.
const I64_MIN_F64: f64 = i64::MIN as f64;
const I64_END_F64: f64 = 9_223_372_036_854_775_808.0;

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Int,
    Float,
    Bool,
    List,
    Dict,
}

impl ParamType {
    /// The JSON-schema type name sent to providers.
    pub fn json_schema_type(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Int => "integer",
            ParamType::Float => "number",
            ParamType::Bool => "boolean",
            ParamType::List => "array",
            ParamType::Dict => "object",
        }
    }

    /// The declared type name as written in definitions.
    pub fn label(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::List => "list",
            ParamType::Dict => "dict",
        }
    }

    /// Check `value` against this type, returning the (possibly coerced) value.
    ///
    /// Only lossless coercions are applied: integral floats and numeric strings
    /// become ints, ints and numeric strings become floats, and the strings
    /// "true"/"false" become bools. Anything else is a mismatch.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ParamType::String, Value::String(_)) => Some(value.clone()),
            (ParamType::Int, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Some(value.clone())
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && (I64_MIN_F64..I64_END_F64).contains(f))
                        .map(|f| Value::from(f as i64))
                }
            }
            (ParamType::Int, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (ParamType::Float, Value::Number(_)) => Some(value.clone()),
            (ParamType::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            (ParamType::Bool, Value::Bool(_)) => Some(value.clone()),
            (ParamType::Bool, Value::String(s)) => match s.trim() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (ParamType::List, Value::Array(_)) => Some(value.clone()),
            (ParamType::Dict, Value::Object(_)) => Some(value.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub ty: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ParamSpec {
    /// Shorthand for a required parameter with no default.
    pub fn required(name: &str, ty: ParamType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: true,
            default: None,
            description: String::new(),
        }
    }

    /// Shorthand for an optional parameter, with or without a default.
    pub fn optional(name: &str, ty: ParamType, default: Option<Value>) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: false,
            default,
            description: String::new(),
        }
    }

    /// Attach a description shown to the model.
    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// A callable capability with a parameter schema and a handler reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Key into the handler table. Defaults to the tool name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str, params: Vec<ParamSpec>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params,
            handler: None,
        }
    }

    /// The key this tool's handler is registered under.
    pub fn handler_key(&self) -> &str {
        self.handler.as_deref().unwrap_or(&self.name)
    }

    /// Look up a declared parameter by name.
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Render the parameter list as a provider-agnostic JSON schema object.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.params {
            let mut property = json!({ "type": param.ty.json_schema_type() });
            if !param.description.is_empty() {
                property["description"] = Value::String(param.description.clone());
            }
            if let Some(default) = &param.default {
                property["default"] = default.clone();
            }
            properties.insert(param.name.clone(), property);
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required
        })
    }
}

/// Retry/fallback policy attached to an agent or a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPolicy {
    #[serde(default)]
    pub retry: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl ErrorPolicy {
    pub fn retry(retry: u32) -> Self {
        Self {
            retry,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: &str) -> Self {
        self.fallback = Some(fallback.to_string());
        self
    }
}

/// A named agent: model, system prompt and tool set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    /// Model identifier. Filled from `config.default_model` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, alias = "system_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<ErrorPolicy>,
}

impl AgentDefinition {
    pub fn new(name: &str, model: &str, prompt: &str) -> Self {
        Self {
            name: name.to_string(),
            model: Some(model.to_string()),
            prompt: prompt.to_string(),
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
            on_error: None,
        }
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = Some(policy);
        self
    }

    /// The model identifier, falling back to the built-in default.
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// An ordered chain of agents (or nested pipelines).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(alias = "agents")]
    pub stages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<ErrorPolicy>,
}

impl PipelineDefinition {
    pub fn new(name: &str, stages: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            stages: stages.iter().map(|s| s.to_string()).collect(),
            on_error: None,
        }
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = Some(policy);
        self
    }
}

/// Global defaults from the definition set's `config` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub default_model: String,
    pub default_temperature: f32,
    pub default_max_tokens: u32,
    pub max_iterations: u32,
    pub default_retry: u32,
    pub mock: bool,
    pub provider_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub model_routes: Vec<ModelRoute>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            default_temperature: DEFAULT_TEMPERATURE,
            default_max_tokens: DEFAULT_MAX_TOKENS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            default_retry: 0,
            mock: false,
            provider_timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            model_routes: Vec::new(),
        }
    }
}

impl GlobalConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// An already-parsed set of definitions, prior to registry validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSet {
    #[serde(default)]
    pub config: GlobalConfig,
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub pipelines: Vec<PipelineDefinition>,
}

impl DefinitionSet {
    /// Parse a definition set from a YAML document.
    pub fn from_yaml_str(source: &str) -> Result<Self, DefinitionError> {
        serde_yaml::from_str(source).map_err(|e| DefinitionError::Parse(e.to_string()))
    }
}
