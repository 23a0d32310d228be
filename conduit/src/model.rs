//! Data model: the durable entities the Run State Store persists and the Executor consumes.
//!
//! Mirrors the engine's conceptual schema (agents, agent_definitions, agent_runs,
//! agent_run_messages, agent_run_tool_calls, agent_processing_log, agent_questions). Summary
//! and content fields are schemaless object maps (`serde_json::Value`), per the engine's
//! dynamic-argument design note.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::SystemTime;

/// Visibility of an [`AgentDefinition`]. `Internal` definitions are hidden from the external
/// catalog but still appear in `list_available_agents` (coordination tools see everything).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    External,
    Project,
    Internal,
}

/// How an [`Agent`] is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Schedule,
    Manual,
    Reaction,
}

/// How concurrent reaction executions for the same agent are handled. Not interpreted by the
/// core beyond being carried on [`ReactionConfig`]; routing/dedup is the processing-log's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyStrategy {
    Parallel,
    Serialize,
    SkipIfRunning,
}

/// Configuration template: prompt, tools, caps. Created/updated by an admin; immutable from
/// the engine's perspective during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Unique per project.
    pub name: String,
    pub project_id: String,
    pub system_prompt: String,
    pub model_name: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ordered; may include `"*"` and glob patterns. Empty ⇒ legacy permissive mode.
    pub tools_whitelist: Vec<String>,
    pub max_steps: Option<u32>,
    pub default_timeout: Option<std::time::Duration>,
    pub visibility: Visibility,
    pub flow_type: String,
    pub workspace_config: Option<Value>,
    pub config: Value,
    pub description: Option<String>,
}

/// A runtime binding of a definition to a schedule/trigger. `Agent.name` matches an
/// `AgentDefinition.name` within the same project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub enabled: bool,
    pub trigger_type: TriggerType,
    pub cron_expression: Option<String>,
    pub reaction_config: Option<ReactionConfig>,
    pub last_run_at: Option<SystemTime>,
    pub last_run_status: Option<RunStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionConfig {
    /// Empty means wildcard `*`.
    pub object_types: Vec<String>,
    pub events: Vec<String>,
    pub ignore_agent_triggered: bool,
    pub ignore_self_triggered: bool,
    pub concurrency_strategy: ConcurrencyStrategy,
}

/// Lifecycle status of an [`AgentRun`]. Only `Paused` permits a subsequent resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Skipped,
    Error,
    Paused,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Skipped | RunStatus::Error | RunStatus::Cancelled
        )
    }
}

/// Provisioning state of a run's sandboxed workspace session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Provisioning,
    Active,
    Completed,
    Error,
}

/// One execution attempt of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: String,
    pub agent_id: String,
    pub project_id: String,
    pub status: RunStatus,
    pub started_at: SystemTime,
    pub completed_at: Option<SystemTime>,
    pub duration_ms: Option<u64>,
    pub summary: Option<Value>,
    pub error_message: Option<String>,
    pub skip_reason: Option<String>,
    pub parent_run_id: Option<String>,
    pub resumed_from: Option<String>,
    /// Cumulative across resumes.
    pub step_count: u32,
    /// Per-attempt budget (may differ from the resume chain's cumulative cap).
    pub max_steps: u32,
    pub session_status: SessionStatus,
    pub workspace_id: Option<String>,
}

/// Options accepted by [`crate::store::RunStore::create_run`].
#[derive(Debug, Clone)]
pub struct CreateRunOptions {
    pub agent_id: String,
    pub project_id: String,
    pub parent_run_id: Option<String>,
    pub resumed_from: Option<String>,
    pub initial_step_count: u32,
    pub max_steps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    ToolResult,
    System,
}

/// A single conversational turn, persisted in arrival order and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunMessage {
    pub id: String,
    pub run_id: String,
    pub role: MessageRole,
    pub content: Value,
    pub step_number: u32,
    pub created_at: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Completed,
    Error,
}

/// One tool invocation, persisted after the tool returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunToolCall {
    pub id: String,
    pub run_id: String,
    pub message_id: Option<String>,
    pub tool_name: String,
    pub input: Value,
    pub output: Value,
    pub status: ToolCallStatus,
    pub duration_ms: u64,
    pub step_number: u32,
    pub created_at: SystemTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    pub value: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Pending,
    Answered,
    Expired,
    Cancelled,
}

/// Human-in-the-loop prompt. Invariant: at most one `pending` question per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentQuestion {
    pub id: String,
    pub run_id: String,
    pub agent_id: String,
    pub project_id: String,
    pub question: String,
    pub options: Vec<QuestionOption>,
    pub status: QuestionStatus,
    pub response: Option<String>,
    pub responder_id: Option<String>,
    pub notification_id: Option<String>,
    pub created_at: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingLogStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Abandoned,
    Skipped,
}

/// Per-object dedup record for reaction agents. Invariant: for a given
/// `(agent_id, object_id, object_version, event_type)` at most one row may be in
/// `{pending, processing}` concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProcessingLog {
    pub id: String,
    pub agent_id: String,
    pub object_id: String,
    pub object_version: String,
    pub event_type: String,
    pub status: ProcessingLogStatus,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Global engine-wide constants (§6 of the execution-engine contract).
pub mod limits {
    pub const MAX_TOTAL_STEPS_PER_RUN: u32 = 500;
    pub const DEFAULT_MAX_DEPTH: u32 = 2;
    pub const DOOM_WARN_THRESHOLD: u32 = 3;
    pub const DOOM_STOP_THRESHOLD: u32 = 5;
    pub const STEP_PERSIST_CADENCE: u32 = 5;
    pub const WORKSPACE_TEARDOWN_TIMEOUT_SECS: u64 = 30;
    pub const WEBHOOK_DEFAULT_RATE_PER_MIN: u32 = 60;
    pub const WEBHOOK_DEFAULT_BURST: u32 = 10;
}
