// ABOUTME: Conversation primitives: messages, tool calls, tool results and the ordered transcript.
// ABOUTME: The Conversation type enforces that tool results answer a previously issued call.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A model-requested tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: &str, name: &str, arguments: Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }
}

/// One turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: &str) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: &str) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// An assistant turn that requests tool calls, with optional accompanying text.
    pub fn assistant_tool_calls(text: Option<&str>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.unwrap_or_default().to_string(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// A tool result turn answering `call_id`.
    pub fn tool(call_id: &str, content: &str) -> Self {
        Self {
            role: Role::Tool,
            content: content.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.to_string()),
        }
    }
}

/// Normalized outcome of one tool call. Exactly one exists per [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(call: &ToolCall, value: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            success: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn failure(call: &ToolCall, error: impl std::fmt::Display) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            success: false,
            value: None,
            error: Some(error.to_string()),
        }
    }

    /// Text the model sees for this result. String values are passed through
    /// verbatim; other values are rendered as JSON.
    pub fn content(&self) -> String {
        if !self.success {
            return format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"));
        }
        match &self.value {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConversationError {
    #[error("tool result references unknown call id '{0}'")]
    UnknownCallId(String),

    #[error("tool call '{0}' already has a result")]
    AlreadyAnswered(String),
}

/// Append-only, strictly ordered message sequence for one agent attempt.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    pending_calls: HashSet<String>,
    answered_calls: HashSet<String>,
}

impl Conversation {
    /// Seed a conversation with the agent's system prompt and the task text.
    pub fn new(system_prompt: &str, task: &str) -> Self {
        let mut conversation = Self::default();
        if !system_prompt.trim().is_empty() {
            conversation.messages.push(Message::system(system_prompt));
        }
        conversation.messages.push(Message::user(task));
        conversation
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn push_assistant(&mut self, text: &str) {
        self.messages.push(Message::assistant(text));
    }

    /// Record an assistant turn that issued tool calls. Call ids are scoped to
    /// this turn, so an id from an earlier turn may be issued again.
    pub fn push_tool_calls(&mut self, text: Option<&str>, calls: Vec<ToolCall>) {
        self.pending_calls.clear();
        self.answered_calls.clear();
        for call in &calls {
            self.pending_calls.insert(call.id.clone());
        }
        self.messages.push(Message::assistant_tool_calls(text, calls));
    }

    /// Append a tool result. The call id must have been issued by the latest
    /// tool-call turn and not yet answered.
    pub fn push_tool_result(&mut self, result: &ToolResult) -> Result<(), ConversationError> {
        if self.answered_calls.contains(&result.call_id) {
            return Err(ConversationError::AlreadyAnswered(result.call_id.clone()));
        }
        if !self.pending_calls.remove(&result.call_id) {
            return Err(ConversationError::UnknownCallId(result.call_id.clone()));
        }
        self.answered_calls.insert(result.call_id.clone());
        self.messages
            .push(Message::tool(&result.call_id, &result.content()));
        Ok(())
    }
}
