//! Callable-tool abstraction: built-in tools and external MCP proxies share this contract so
//! the Tool Pool can wrap either uniformly.

pub mod context;

pub use context::ToolCallContext;

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ToolSourceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("rpc error: {0}")]
    JsonRpc(String),
    #[error("unknown tool: {0}")]
    NotFound(String),
}

/// Descriptor surfaced to the LLM: name, description, and JSON input schema. Aligned with the
/// MCP `tools/list` result shape so built-in and external tools describe themselves identically.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Raw content blocks returned by a tool call, before the Tool Pool's wrapping rules turn them
/// into the `{error}` / `{result}` / `{results}` shape the LLM sees. Each entry is one MCP-style
/// text content block (or the single chunk a built-in tool produces).
#[derive(Debug, Clone, Default)]
pub struct ToolCallContent {
    pub parts: Vec<String>,
}

impl ToolCallContent {
    pub fn single(text: impl Into<String>) -> Self {
        Self {
            parts: vec![text.into()],
        }
    }
}

/// A source of callable tools: a built-in registry or a proxy onto an external MCP server.
/// `call_tool_with_context`/`set_call_context` default to ignoring the per-call context; only
/// tool sources that need conversation state (e.g. short-term memory tools) override them.
#[async_trait]
pub trait ToolSource: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallContent, ToolSourceError>;

    async fn call_tool_with_context(
        &self,
        name: &str,
        arguments: Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        self.call_tool(name, arguments).await
    }

    fn set_call_context(&self, _ctx: ToolCallContext) {}
}
