//! LLM client abstraction the Executor drives during its pipeline loop.
//!
//! Mirrors the shape of a conventional single-call + streaming chat client: `invoke` for
//! a full turn, `invoke_stream` for incremental text/tool-call deltas with a default
//! fallback onto `invoke` for clients that don't support streaming.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::message::{Message, ToolCallRequest};
use crate::tool_source::ToolSpec;

#[derive(Clone, Debug, Default)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One complete LLM turn: either plain text or one or more tool calls (never both carry
/// meaning at once — a turn with tool calls is acted on before its text, if any, matters).
#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<LlmUsage>,
}

/// Delta for one in-progress tool call, emitted while streaming.
#[derive(Clone, Debug)]
pub struct ToolCallDelta {
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub arguments_delta: String,
}

/// One increment of a streamed LLM turn.
#[derive(Clone, Debug)]
pub enum StreamChunk {
    TextDelta(String),
    ToolCallDelta(ToolCallDelta),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolChoiceMode {
    #[default]
    Auto,
    None,
    Required,
}

/// The model factory's resolved handle to one provider/model pair, bound to a tool set for
/// the duration of one pipeline loop.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        tool_choice: ToolChoiceMode,
    ) -> Result<LlmResponse, AgentError>;

    /// Default: no real streaming, emits the full content as one delta then returns.
    async fn invoke_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        tool_choice: ToolChoiceMode,
        chunk_tx: Option<mpsc::Sender<StreamChunk>>,
    ) -> Result<LlmResponse, AgentError> {
        let response = self.invoke(messages, tools, tool_choice).await?;
        if let Some(tx) = chunk_tx {
            if !response.content.is_empty() {
                let _ = tx.send(StreamChunk::TextDelta(response.content.clone())).await;
            }
        }
        Ok(response)
    }
}

/// External collaborator: resolves a model name (or the caller's default) to a live
/// `LlmClient`. The engine treats generation transport as opaque.
#[async_trait]
pub trait ModelFactory: Send + Sync {
    async fn resolve(&self, model_name: Option<&str>) -> Result<std::sync::Arc<dyn LlmClient>, AgentError>;
}

/// Fixed-response client for tests: returns the same response on every `invoke`, or the
/// next one in a queue if `with_script` was used.
pub struct MockLlm {
    script: std::sync::Mutex<Vec<LlmResponse>>,
}

impl MockLlm {
    pub fn fixed(content: impl Into<String>) -> Self {
        Self {
            script: std::sync::Mutex::new(vec![LlmResponse {
                content: content.into(),
                tool_calls: Vec::new(),
                usage: None,
            }]),
        }
    }

    pub fn with_script(responses: Vec<LlmResponse>) -> Self {
        let mut responses = responses;
        responses.reverse();
        Self {
            script: std::sync::Mutex::new(responses),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(
        &self,
        _messages: &[Message],
        _tools: &[ToolSpec],
        _tool_choice: ToolChoiceMode,
    ) -> Result<LlmResponse, AgentError> {
        let mut script = self.script.lock().expect("mock llm mutex poisoned");
        Ok(script.pop().unwrap_or_default())
    }
}
