//! Ask-User Tool: lets an agent pause its run and hand control to a human operator.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::model::QuestionOption;
use crate::store::RunStore;
use crate::tool_source::{ToolCallContent, ToolCallContext, ToolSourceError, ToolSpec};
use crate::tools::Tool;

pub const TOOL_ASK_USER: &str = "ask_user";

/// Per-run ask-pause signal. `request` and `get` both move through a single lock so the
/// `requested` flag and the question id are always observed together.
#[derive(Default)]
pub struct AskPauseFlag {
    question_id: Mutex<Option<String>>,
}

impl AskPauseFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, question_id: String) {
        *self.question_id.lock().expect("ask-pause flag mutex poisoned") = Some(question_id);
    }

    /// `Some(question_id)` iff a pause has been requested.
    pub fn get(&self) -> Option<String> {
        self.question_id
            .lock()
            .expect("ask-pause flag mutex poisoned")
            .clone()
    }

    pub fn clear(&self) {
        *self.question_id.lock().expect("ask-pause flag mutex poisoned") = None;
    }
}

/// Describes the question to the external notification sink.
pub struct QuestionNotification {
    pub run_id: String,
    pub agent_id: String,
    pub project_id: String,
    pub question: String,
    pub options: Vec<QuestionOption>,
    /// Set only when `options` is empty — a link the user follows to answer free-form.
    pub response_url: Option<String>,
}

/// External collaborator: the notification sink. The engine only needs a notification id
/// back to link onto the question record.
#[async_trait]
pub trait UserNotifier: Send + Sync {
    async fn notify_question(&self, notification: QuestionNotification) -> Result<String, String>;
}

/// The `ask_user` tool, bound to one run.
pub struct AskUserTool {
    store: Arc<dyn RunStore>,
    notifier: Arc<dyn UserNotifier>,
    pause_flag: Arc<AskPauseFlag>,
    run_id: String,
    agent_id: String,
    project_id: String,
}

impl AskUserTool {
    pub fn new(
        store: Arc<dyn RunStore>,
        notifier: Arc<dyn UserNotifier>,
        pause_flag: Arc<AskPauseFlag>,
        run_id: impl Into<String>,
        agent_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            pause_flag,
            run_id: run_id.into(),
            agent_id: agent_id.into(),
            project_id: project_id.into(),
        }
    }
}

fn parse_options(args: &Value) -> Result<Vec<QuestionOption>, ToolSourceError> {
    let Some(raw) = args.get("options") else {
        return Ok(Vec::new());
    };
    let Some(arr) = raw.as_array() else {
        return Err(ToolSourceError::InvalidInput(
            "options must be an array".into(),
        ));
    };
    arr.iter()
        .map(|o| {
            let label = o
                .get("label")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolSourceError::InvalidInput("option.label is required".into()))?
                .to_string();
            let value = o
                .get("value")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolSourceError::InvalidInput("option.value is required".into()))?
                .to_string();
            let description = o
                .get("description")
                .and_then(|v| v.as_str())
                .map(String::from);
            Ok(QuestionOption {
                label,
                value,
                description,
            })
        })
        .collect()
}

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        TOOL_ASK_USER
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_ASK_USER.to_string(),
            description: Some(
                "Ask the human operator a question and pause this run until they respond."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "question": {"type": "string"},
                    "options": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "label": {"type": "string"},
                                "value": {"type": "string"},
                                "description": {"type": "string"}
                            },
                            "required": ["label", "value"]
                        }
                    }
                },
                "required": ["question"]
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        let question = args
            .get("question")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ToolSourceError::InvalidInput("question must be a non-empty string".into())
            })?
            .to_string();
        let options = parse_options(&args)?;

        self.store
            .cancel_pending_questions_for_run(&self.run_id)
            .await
            .map_err(|e| ToolSourceError::Transport(e.to_string()))?;

        let created = self
            .store
            .create_question(
                &self.run_id,
                &self.agent_id,
                &self.project_id,
                &question,
                options.clone(),
            )
            .await
            .map_err(|e| ToolSourceError::Transport(e.to_string()))?;

        let response_url = if options.is_empty() {
            Some(format!("/questions/{}/answer", created.id))
        } else {
            None
        };

        let notification_id = self
            .notifier
            .notify_question(QuestionNotification {
                run_id: self.run_id.clone(),
                agent_id: self.agent_id.clone(),
                project_id: self.project_id.clone(),
                question: question.clone(),
                options,
                response_url,
            })
            .await
            .map_err(ToolSourceError::Transport)?;

        self.store
            .link_question_notification(&created.id, &notification_id)
            .await
            .map_err(|e| ToolSourceError::Transport(e.to_string()))?;

        // Both fields move through one lock, so the next before-model tick always sees
        // `requested` and the question id together.
        self.pause_flag.request(created.id.clone());

        Ok(ToolCallContent::single(
            serde_json::json!({
                "question_id": created.id,
                "status": "pausing",
                "message": "Waiting for the user to respond.",
            })
            .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRunStore;

    struct RecordingNotifier;

    #[async_trait]
    impl UserNotifier for RecordingNotifier {
        async fn notify_question(
            &self,
            _notification: QuestionNotification,
        ) -> Result<String, String> {
            Ok("notif-1".to_string())
        }
    }

    async fn setup() -> (Arc<InMemoryRunStore>, String) {
        let store = Arc::new(InMemoryRunStore::new());
        let run = store
            .create_run(crate::model::CreateRunOptions {
                agent_id: "agent-1".into(),
                project_id: "proj-1".into(),
                parent_run_id: None,
                resumed_from: None,
                initial_step_count: 0,
                max_steps: 10,
            })
            .await
            .unwrap();
        (store, run.id)
    }

    #[tokio::test]
    async fn asking_requests_a_pause_and_creates_a_pending_question() {
        let (store, run_id) = setup().await;
        let flag = Arc::new(AskPauseFlag::new());
        let tool = AskUserTool::new(
            store.clone(),
            Arc::new(RecordingNotifier),
            flag.clone(),
            run_id.clone(),
            "agent-1",
            "proj-1",
        );

        let result = tool
            .call(serde_json::json!({"question": "Proceed?"}), None)
            .await
            .unwrap();
        assert_eq!(result.parts.len(), 1);
        assert!(flag.get().is_some());

        let questions = store.list_questions_by_run(&run_id).await.unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].status, crate::model::QuestionStatus::Pending);
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let (store, run_id) = setup().await;
        let tool = AskUserTool::new(
            store,
            Arc::new(RecordingNotifier),
            Arc::new(AskPauseFlag::new()),
            run_id,
            "agent-1",
            "proj-1",
        );
        let err = tool
            .call(serde_json::json!({"question": ""}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolSourceError::InvalidInput(_)));
    }
}
