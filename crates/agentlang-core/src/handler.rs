// ABOUTME: The tool handler seam: an async trait invoked with validated arguments.
// ABOUTME: Includes a closure adapter so embedding code can register plain functions.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Validated, defaulted argument map handed to a tool handler.
pub type ToolArgs = Map<String, Value>;

/// Implementation behind a declared tool.
///
/// Handlers receive arguments that already passed schema validation, with
/// defaults applied. Any error they return is reported back to the model as
/// a failed tool result; it never aborts the run.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: ToolArgs) -> Result<Value, anyhow::Error>;
}

/// Wraps a synchronous closure as a [`ToolHandler`].
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(ToolArgs) -> Result<Value, anyhow::Error> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(ToolArgs) -> Result<Value, anyhow::Error> + Send + Sync,
{
    async fn call(&self, args: ToolArgs) -> Result<Value, anyhow::Error> {
        (self.func)(args)
    }
}

/// Box a closure into a shareable handler.
pub fn handler_fn<F>(func: F) -> Arc<dyn ToolHandler>
where
    F: Fn(ToolArgs) -> Result<Value, anyhow::Error> + Send + Sync + 'static,
{
    Arc::new(FnHandler::new(func))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closure_handler_receives_arguments() {
        let handler = handler_fn(|args| {
            let x = args.get("x").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(x * 2))
        });

        let mut args = ToolArgs::new();
        args.insert("x".to_string(), json!(21));
        assert_eq!(handler.call(args).await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn closure_handler_propagates_errors() {
        let handler = handler_fn(|_| Err(anyhow::anyhow!("disk full")));
        let err = handler.call(ToolArgs::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }
}
