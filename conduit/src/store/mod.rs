//! Run State Store: durable records for runs, messages, tool calls, questions, and the
//! reaction processing log.
//!
//! The Executor never reaches into a concrete backend directly — it holds `Arc<dyn RunStore>`.
//! Two implementations ship here: [`SqliteRunStore`] for single-node persistence, and
//! [`InMemoryRunStore`] for tests and ephemeral dev runs.

mod in_memory;
mod sqlite;

pub use in_memory::InMemoryRunStore;
pub use sqlite::SqliteRunStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::model::{
    AgentProcessingLog, AgentQuestion, AgentRun, AgentRunMessage, AgentRunToolCall,
    CreateRunOptions, ProcessingLogStatus, QuestionOption, QuestionStatus, RunStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization: {0}")]
    Serialization(String),
}

/// Optional filters for [`RunStore::find_runs_by_project_paginated`].
#[derive(Debug, Clone, Default)]
pub struct RunFilters {
    pub agent_id: Option<String>,
    pub status: Option<RunStatus>,
}

/// Durable storage contract the Executor depends on. Failure semantics: I/O errors surface as
/// a failure of the enclosing operation; callers decide whether the path is best-effort
/// (periodic step_count checkpoint, message/tool-call persistence — log and continue) or fatal
/// (run creation).
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, options: CreateRunOptions) -> Result<AgentRun, StoreError>;

    /// Transitions to `paused`, sets `completed_at`, persists `step_count`. A no-op (not an
    /// error) if the run is already terminal.
    async fn pause_run(&self, id: &str, step_count: u32) -> Result<(), StoreError>;

    async fn complete_run(
        &self,
        id: &str,
        summary: Value,
        steps: u32,
        duration_ms: u64,
    ) -> Result<(), StoreError>;

    async fn fail_run(&self, id: &str, error: &str, steps: u32) -> Result<(), StoreError>;

    async fn cancel_run(&self, id: &str) -> Result<(), StoreError>;

    /// Idempotent absolute-write of the cumulative step count.
    async fn update_step_count(&self, id: &str, n: u32) -> Result<(), StoreError>;

    async fn set_workspace(
        &self,
        id: &str,
        workspace_id: Option<&str>,
        session_status: crate::model::SessionStatus,
    ) -> Result<(), StoreError>;

    async fn create_message(&self, msg: AgentRunMessage) -> Result<AgentRunMessage, StoreError>;

    async fn create_tool_call(
        &self,
        tc: AgentRunToolCall,
    ) -> Result<AgentRunToolCall, StoreError>;

    /// Ascending creation order.
    async fn find_messages_by_run(&self, id: &str) -> Result<Vec<AgentRunMessage>, StoreError>;

    async fn find_run_by_id(&self, id: &str) -> Result<Option<AgentRun>, StoreError>;

    async fn find_run_by_id_for_project(
        &self,
        id: &str,
        project_id: &str,
    ) -> Result<Option<AgentRun>, StoreError>;

    async fn find_runs_by_project_paginated(
        &self,
        project_id: &str,
        filters: RunFilters,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<AgentRun>, StoreError>;

    // --- Reaction processing log ---

    async fn create_processing_log(
        &self,
        log: AgentProcessingLog,
    ) -> Result<AgentProcessingLog, StoreError>;

    async fn find_pending_or_processing(
        &self,
        agent_id: &str,
        object_id: &str,
        object_version: &str,
        event_type: &str,
    ) -> Result<Option<AgentProcessingLog>, StoreError>;

    async fn mark_processing_log_status(
        &self,
        id: &str,
        status: ProcessingLogStatus,
    ) -> Result<(), StoreError>;

    async fn mark_stuck_jobs_as_abandoned(
        &self,
        older_than: std::time::Duration,
    ) -> Result<u64, StoreError>;

    // --- Questions ---

    async fn create_question(
        &self,
        run_id: &str,
        agent_id: &str,
        project_id: &str,
        question: &str,
        options: Vec<QuestionOption>,
    ) -> Result<AgentQuestion, StoreError>;

    async fn find_question_by_id(&self, id: &str) -> Result<Option<AgentQuestion>, StoreError>;

    /// Cancels any `pending` questions for the run. Returns the number cancelled (0 or 1 in
    /// practice, since at most one question is ever pending per run).
    async fn cancel_pending_questions_for_run(&self, run_id: &str) -> Result<u64, StoreError>;

    async fn link_question_notification(
        &self,
        id: &str,
        notification_id: &str,
    ) -> Result<(), StoreError>;

    async fn answer_question(
        &self,
        id: &str,
        response: &str,
        responder_id: &str,
    ) -> Result<(), StoreError>;

    async fn list_questions_by_run(&self, run_id: &str) -> Result<Vec<AgentQuestion>, StoreError>;

    async fn list_questions_by_project(
        &self,
        project_id: &str,
        status: Option<QuestionStatus>,
    ) -> Result<Vec<AgentQuestion>, StoreError>;
}
