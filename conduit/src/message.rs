//! Conversational turns exchanged with the model during a run.

use serde::{Deserialize, Serialize};

/// One turn in the conversation fed to the LLM. Distinct from [`crate::model::AgentRunMessage`]:
/// this is the in-flight representation the pipeline builds up during a step; the Executor
/// persists a durable `AgentRunMessage` from it once a step completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System(String),
    User(String),
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResult {
        tool_call_id: String,
        content: serde_json::Value,
    },
}

/// A function call the model asked for inside an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Message::System(text.into())
    }

    pub fn user(text: impl Into<String>) -> Self {
        Message::User(text.into())
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Message::Assistant {
            content: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Message::Assistant {
            content: text.into(),
            tool_calls,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: serde_json::Value) -> Self {
        Message::ToolResult {
            tool_call_id: tool_call_id.into(),
            content,
        }
    }

    /// Plain-text content, for the variants that carry one.
    pub fn text(&self) -> Option<&str> {
        match self {
            Message::System(s) | Message::User(s) => Some(s),
            Message::Assistant { content, .. } => Some(content),
            Message::ToolResult { .. } => None,
        }
    }

    pub fn role_str(&self) -> &'static str {
        match self {
            Message::System(_) => "system",
            Message::User(_) => "user",
            Message::Assistant { .. } => "assistant",
            Message::ToolResult { .. } => "tool_result",
        }
    }
}
