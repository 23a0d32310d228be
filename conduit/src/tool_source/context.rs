//! Per-call context passed into [`super::ToolSource::call_tool_with_context`]. Most tool
//! sources ignore it; it exists for the handful that need the current conversation (e.g. a
//! recap tool reading recent turns) without threading `Vec<Message>` through every call site.

use crate::message::Message;

#[derive(Debug, Clone, Default)]
pub struct ToolCallContext {
    pub recent_messages: Vec<Message>,
}

impl ToolCallContext {
    pub fn new(recent_messages: Vec<Message>) -> Self {
        Self { recent_messages }
    }
}
