// ABOUTME: Implements the read_file and write_file built-in tools on top of tokio::fs.
// ABOUTME: write_file creates missing parent directories and reports the byte count written.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Value, json};

use agentlang_core::{ParamSpec, ParamType, ToolArgs, ToolDefinition, ToolHandler};

use super::str_arg;

/// Reads a UTF-8 text file and returns its contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadFileTool;

impl ReadFileTool {
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new(
            "read_file",
            "Read a text file and return its contents.",
            vec![
                ParamSpec::required("path", ParamType::String)
                    .describe("Path of the file to read"),
            ],
        )
    }
}

#[async_trait]
impl ToolHandler for ReadFileTool {
    async fn call(&self, args: ToolArgs) -> Result<Value, anyhow::Error> {
        let path = str_arg(&args, "path")?;
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {path}"))?;
        Ok(Value::String(contents))
    }
}

/// Writes text to a file, replacing any existing contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteFileTool;

impl WriteFileTool {
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new(
            "write_file",
            "Write text to a file, creating parent directories as needed.",
            vec![
                ParamSpec::required("path", ParamType::String)
                    .describe("Path of the file to write"),
                ParamSpec::required("content", ParamType::String).describe("Text to write"),
            ],
        )
    }
}

#[async_trait]
impl ToolHandler for WriteFileTool {
    async fn call(&self, args: ToolArgs) -> Result<Value, anyhow::Error> {
        let path = str_arg(&args, "path")?;
        let content = str_arg(&args, "content")?;

        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("failed to write {path}"))?;

        Ok(json!(format!("Wrote {} bytes to {}", content.len(), path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(pairs: &[(&str, &str)]) -> ToolArgs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[tokio::test]
    async fn write_then_read_round_trips_through_nested_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes/today/summary.txt");
        let path_str = path.to_string_lossy().to_string();

        let written = WriteFileTool
            .call(args(&[("path", path_str.as_str()), ("content", "héllo")]))
            .await
            .unwrap();
        assert_eq!(written, json!(format!("Wrote 6 bytes to {path_str}")));

        let read = ReadFileTool.call(args(&[("path", path_str.as_str())])).await.unwrap();
        assert_eq!(read, json!("héllo"));
    }

    #[tokio::test]
    async fn reading_a_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.txt").to_string_lossy().to_string();
        let err = ReadFileTool
            .call(args(&[("path", path.as_str())]))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to read"));
    }
}
