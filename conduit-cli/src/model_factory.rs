//! A `ModelFactory` the CLI can actually construct without an external model transport.
//!
//! Wiring a real LLM provider is the operator's job (the engine treats the model factory and
//! generation transport as an external collaborator); this gives `conduit execute` something
//! to run against for local dry runs — it echoes the user message back as the final answer.

use std::sync::Arc;

use async_trait::async_trait;
use conduit::{AgentError, LlmClient, MockLlm, ModelFactory};

pub struct EchoModelFactory;

#[async_trait]
impl ModelFactory for EchoModelFactory {
    async fn resolve(&self, _model_name: Option<&str>) -> Result<Arc<dyn LlmClient>, AgentError> {
        Ok(Arc::new(MockLlm::fixed(
            "(dry run: no model transport configured, echoing the request)",
        )))
    }
}
