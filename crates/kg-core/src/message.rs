//! Conversation turns exchanged between the loop and the generation backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::ToolResult => write!(f, "tool_result"),
        }
    }
}

/// Turn payload: plain text or a structured JSON value (tool results).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Structured(Value),
}

impl Content {
    /// Render the payload as text for a backend that only accepts strings.
    pub fn to_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Structured(v) => v.to_string(),
        }
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(text.into()),
        }
    }

    /// A tool-result turn. The payload is wrapped as `{"output": ...}`.
    pub fn tool_result(output: Value) -> Self {
        Self {
            role: Role::ToolResult,
            content: Content::Structured(serde_json::json!({ "output": output })),
        }
    }
}

/// Ordered, append-only log of turns for one task.
///
/// The only way to drop turns is [`Conversation::reset`], which starts a new task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new task: the log becomes a single user turn holding the prompt.
    pub fn reset(&mut self, prompt: impl Into<String>) {
        self.messages.clear();
        self.messages.push(Message::user(prompt));
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Copy of the turns, for reports and traces.
    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_leaves_single_user_turn() {
        let mut conv = Conversation::new();
        conv.reset("first task");
        conv.push(Message::assistant("thinking"));
        conv.push(Message::tool_result(Value::String("done".into())));
        assert_eq!(conv.len(), 3);

        conv.reset("second task");
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.messages()[0].role, Role::User);
        assert_eq!(conv.messages()[0].content.to_text(), "second task");
    }

    #[test]
    fn test_tool_result_wraps_output() {
        let msg = Message::tool_result(serde_json::json!({"Q1": "first"}));
        assert_eq!(msg.role, Role::ToolResult);
        match msg.content {
            Content::Structured(v) => assert_eq!(v["output"]["Q1"], "first"),
            Content::Text(_) => panic!("expected structured content"),
        }
    }

    #[test]
    fn test_role_serializes_snake_case() {
        let json = serde_json::to_string(&Role::ToolResult).unwrap();
        assert_eq!(json, "\"tool_result\"");
    }
}
