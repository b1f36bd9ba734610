// ABOUTME: Error type for loading and validating a definition set.
// ABOUTME: Every variant is fatal at load time and names the offending definition.

use thiserror::Error;

use crate::routing::RouteError;

/// Errors raised while parsing or validating agent, tool and pipeline definitions.
#[derive(Debug, Error, PartialEq)]
pub enum DefinitionError {
    #[error("failed to parse definitions: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("duplicate {kind} name: {name}")]
    Duplicate { kind: &'static str, name: String },

    #[error("'{0}' is defined both as an agent and as a pipeline")]
    NameCollision(String),

    #[error("agent '{agent}' references unknown tool '{tool}'")]
    UnknownTool { agent: String, tool: String },

    #[error("pipeline '{pipeline}' references unknown stage '{stage}'")]
    UnknownStage { pipeline: String, stage: String },

    #[error("'{owner}' declares unknown fallback '{fallback}'")]
    UnknownFallback { owner: String, fallback: String },

    #[error("pipeline '{0}' has no stages")]
    EmptyPipeline(String),

    #[error("tool '{tool}' declares parameter '{param}' more than once")]
    DuplicateParameter { tool: String, param: String },

    #[error("tool '{tool}' parameter '{param}': {reason}")]
    InvalidParameter {
        tool: String,
        param: String,
        reason: String,
    },

    #[error("tool '{tool}' uses handler '{handler}' which is not registered")]
    UnresolvedHandler { tool: String, handler: String },

    #[error("agent '{agent}' has an invalid setting: {reason}")]
    InvalidAgent { agent: String, reason: String },

    #[error("agent '{agent}': {source}")]
    Model {
        agent: String,
        #[source]
        source: RouteError,
    },

    #[error("reference cycle: {0}")]
    Cycle(String),
}
