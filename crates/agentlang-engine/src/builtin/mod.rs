// ABOUTME: Built-in tools that every definition set may reference without declaring them.
// ABOUTME: Provides file read/write, HTTP GET and a web_search placeholder as default registry entries.

pub mod files;
pub mod web;

use std::sync::Arc;

use agentlang_core::{RegistryBuilder, ToolArgs, ToolDefinition, ToolHandler};

pub use files::{ReadFileTool, WriteFileTool};
pub use web::{HttpGetTool, WebSearchTool};

/// Every built-in tool definition paired with its handler.
pub fn all_tools() -> Vec<(ToolDefinition, Arc<dyn ToolHandler>)> {
    vec![
        (WebSearchTool::definition(), Arc::new(WebSearchTool)),
        (ReadFileTool::definition(), Arc::new(ReadFileTool)),
        (WriteFileTool::definition(), Arc::new(WriteFileTool)),
        (HttpGetTool::definition(), Arc::new(HttpGetTool::new())),
    ]
}

/// Register the built-in tools as defaults. Declared tools with the same name win.
pub fn install(builder: RegistryBuilder) -> RegistryBuilder {
    all_tools()
        .into_iter()
        .fold(builder, |builder, (tool, handler)| builder.default_tool(tool, handler))
}

/// Fetch a string argument that schema validation already guaranteed.
pub(crate) fn str_arg<'a>(args: &'a ToolArgs, key: &str) -> Result<&'a str, anyhow::Error> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing string argument '{key}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlang_core::{AgentDefinition, DefinitionRegistry, DefinitionSet};

    #[test]
    fn builtins_are_available_without_declaration() {
        let set = DefinitionSet {
            agents: vec![
                AgentDefinition::new("researcher", "gpt-4", "Research things.")
                    .with_tools(&["web_search", "read_file", "write_file", "http_get"]),
            ],
            ..DefinitionSet::default()
        };

        let registry = install(DefinitionRegistry::builder(set)).build().unwrap();
        assert_eq!(
            registry.tool_names(),
            vec!["http_get", "read_file", "web_search", "write_file"]
        );
        for name in registry.tool_names() {
            let tool = registry.tool(name).unwrap();
            assert!(registry.handler_for(tool).is_some());
        }
    }

    #[test]
    fn builtin_names_are_unique() {
        let tools = all_tools();
        let mut names: Vec<&str> = tools.iter().map(|(t, _)| t.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), tools.len());
    }
}
