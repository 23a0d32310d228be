//! Local stand-ins for the Executor's external collaborators. Concrete tools, a real model
//! transport, and a push-notification sink are deployment-specific — this binary only needs
//! enough to drive runs and let `ask_user`'s `response_url` flow work end to end.

use std::sync::Arc;

use async_trait::async_trait;
use conduit::{AgentError, LlmClient, MockLlm, ModelFactory, QuestionNotification, UserNotifier};
use conduit::{ToolCallContent, ToolSource, ToolSourceError, ToolSpec};
use serde_json::Value;

pub struct NoToolSource;

#[async_trait]
impl ToolSource for NoToolSource {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError> {
        Ok(Vec::new())
    }

    async fn call_tool(&self, name: &str, _arguments: Value) -> Result<ToolCallContent, ToolSourceError> {
        Err(ToolSourceError::NotFound(name.to_string()))
    }
}

pub struct EchoModelFactory;

#[async_trait]
impl ModelFactory for EchoModelFactory {
    async fn resolve(&self, _model_name: Option<&str>) -> Result<Arc<dyn LlmClient>, AgentError> {
        Ok(Arc::new(MockLlm::fixed(
            "(dry run: no model transport configured, echoing the request)",
        )))
    }
}

/// Logs the question and hands back a synthetic id. Operators answer via the
/// `response_url` the question record carries, not via this notifier.
pub struct LoggingNotifier;

#[async_trait]
impl UserNotifier for LoggingNotifier {
    async fn notify_question(&self, n: QuestionNotification) -> Result<String, String> {
        tracing::info!(run_id = %n.run_id, question = %n.question, "run paused awaiting user input");
        Ok(format!("log-notification-{}", n.run_id))
    }
}
