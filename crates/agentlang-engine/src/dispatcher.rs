// ABOUTME: Tool dispatcher: validates model-issued arguments against the tool schema and runs handlers.
// ABOUTME: Every call yields exactly one ToolResult; failures of any kind are captured, never raised.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;

use agentlang_core::{AgentDefinition, DefinitionRegistry, ToolArgs, ToolDefinition};

use crate::message::{ToolCall, ToolResult};

/// Why a tool call did not produce a value.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolDispatchError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool '{tool}' expects a JSON object of arguments, got {got}")]
    InvalidArguments { tool: String, got: String },

    #[error("tool '{tool}' is missing required argument '{param}'")]
    MissingArgument { tool: String, param: String },

    #[error("tool '{tool}' argument '{param}' must be {expected}, got {got}")]
    TypeMismatch {
        tool: String,
        param: String,
        expected: &'static str,
        got: String,
    },

    #[error("tool '{tool}' does not accept argument '{param}'")]
    UnknownArgument { tool: String, param: String },

    #[error("tool '{tool}' failed: {message}")]
    HandlerFailed { tool: String, message: String },

    #[error("tool '{tool}' timed out after {}s", .timeout.as_secs())]
    Timeout { tool: String, timeout: Duration },
}

impl ToolDispatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolDispatchError::NotFound(_) => "not_found",
            ToolDispatchError::InvalidArguments { .. } => "invalid_arguments",
            ToolDispatchError::MissingArgument { .. } => "missing_argument",
            ToolDispatchError::TypeMismatch { .. } => "type_mismatch",
            ToolDispatchError::UnknownArgument { .. } => "unknown_argument",
            ToolDispatchError::HandlerFailed { .. } => "handler_failed",
            ToolDispatchError::Timeout { .. } => "timeout",
        }
    }
}

/// Short description of a JSON value's shape, for error messages.
fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) if s.chars().count() > 40 => "a string".to_string(),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(_) => "an array".to_string(),
        Value::Object(_) => "an object".to_string(),
    }
}

/// Check `arguments` against `tool`'s schema, coercing lossless mismatches and
/// filling declared defaults. Unknown arguments are rejected.
pub fn validate_arguments(
    tool: &ToolDefinition,
    arguments: &Value,
) -> Result<ToolArgs, ToolDispatchError> {
    let supplied = match arguments {
        Value::Object(map) => map.clone(),
        Value::Null => ToolArgs::new(),
        // Some backends hand over the raw JSON string.
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => {
                return Err(ToolDispatchError::InvalidArguments {
                    tool: tool.name.clone(),
                    got: describe(arguments),
                });
            }
        },
        other => {
            return Err(ToolDispatchError::InvalidArguments {
                tool: tool.name.clone(),
                got: describe(other),
            });
        }
    };

    if let Some(unknown) = supplied.keys().find(|key| tool.param(key).is_none()) {
        return Err(ToolDispatchError::UnknownArgument {
            tool: tool.name.clone(),
            param: unknown.clone(),
        });
    }

    let mut validated = ToolArgs::new();
    for param in &tool.params {
        match supplied.get(&param.name) {
            Some(Value::Null) | None => {
                if let Some(default) = &param.default {
                    validated.insert(param.name.clone(), default.clone());
                } else if param.required {
                    return Err(ToolDispatchError::MissingArgument {
                        tool: tool.name.clone(),
                        param: param.name.clone(),
                    });
                }
            }
            Some(value) => {
                let coerced =
                    param
                        .ty
                        .coerce(value)
                        .ok_or_else(|| ToolDispatchError::TypeMismatch {
                            tool: tool.name.clone(),
                            param: param.name.clone(),
                            expected: param.ty.label(),
                            got: describe(value),
                        })?;
                validated.insert(param.name.clone(), coerced);
            }
        }
    }

    Ok(validated)
}

/// Dispatches tool calls for one agent against the registry's handler table.
pub struct ToolDispatcher<'a> {
    registry: &'a DefinitionRegistry,
    allowed: HashSet<&'a str>,
    timeout: Duration,
}

impl<'a> ToolDispatcher<'a> {
    /// A dispatcher restricted to the tools `agent` declares.
    pub fn for_agent(
        registry: &'a DefinitionRegistry,
        agent: &'a AgentDefinition,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            allowed: agent.tools.iter().map(String::as_str).collect(),
            timeout,
        }
    }

    /// Run one call to completion. Never fails: errors become a failed result.
    pub async fn invoke(&self, call: &ToolCall) -> ToolResult {
        match self.try_invoke(call).await {
            Ok(value) => {
                tracing::debug!(tool = %call.name, call_id = %call.id, "tool call succeeded");
                ToolResult::success(call, value)
            }
            Err(err) => {
                tracing::warn!(
                    tool = %call.name,
                    call_id = %call.id,
                    kind = err.kind(),
                    error = %err,
                    "tool call failed"
                );
                ToolResult::failure(call, err)
            }
        }
    }

    /// Run calls one at a time, returning results in call order.
    pub async fn invoke_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.invoke(call).await);
        }
        results
    }

    async fn try_invoke(&self, call: &ToolCall) -> Result<Value, ToolDispatchError> {
        let tool = self
            .allowed
            .contains(call.name.as_str())
            .then(|| self.registry.tool(&call.name))
            .flatten()
            .ok_or_else(|| ToolDispatchError::NotFound(call.name.clone()))?;

        let args = validate_arguments(tool, &call.arguments)?;

        let handler =
            self.registry
                .handler_for(tool)
                .ok_or_else(|| ToolDispatchError::HandlerFailed {
                    tool: tool.name.clone(),
                    message: format!("no handler registered under '{}'", tool.handler_key()),
                })?;

        let guarded = AssertUnwindSafe(handler.call(args)).catch_unwind();
        match tokio::time::timeout(self.timeout, guarded).await {
            Err(_) => Err(ToolDispatchError::Timeout {
                tool: tool.name.clone(),
                timeout: self.timeout,
            }),
            Ok(Err(panic)) => Err(ToolDispatchError::HandlerFailed {
                tool: tool.name.clone(),
                message: panic_message(panic.as_ref()),
            }),
            Ok(Ok(Err(err))) => Err(ToolDispatchError::HandlerFailed {
                tool: tool.name.clone(),
                message: format!("{err:#}"),
            }),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
