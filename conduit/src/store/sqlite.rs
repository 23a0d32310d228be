//! SQLite-backed [`RunStore`]. Single-node, production-suitable persistence.

use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use rusqlite::params;
use serde_json::Value;

use crate::model::{
    AgentProcessingLog, AgentQuestion, AgentRun, AgentRunMessage, AgentRunToolCall,
    CreateRunOptions, MessageRole, ProcessingLogStatus, QuestionOption, QuestionStatus, RunStatus,
    SessionStatus, ToolCallStatus,
};

use super::{RunFilters, RunStore, StoreError};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn ms_to_time(ms: i64) -> SystemTime {
    SystemTime::UNIX_EPOCH + std::time::Duration::from_millis(ms.max(0) as u64)
}

fn status_to_str(s: RunStatus) -> &'static str {
    match s {
        RunStatus::Running => "running",
        RunStatus::Success => "success",
        RunStatus::Skipped => "skipped",
        RunStatus::Error => "error",
        RunStatus::Paused => "paused",
        RunStatus::Cancelled => "cancelled",
    }
}

fn str_to_status(s: &str) -> RunStatus {
    match s {
        "success" => RunStatus::Success,
        "skipped" => RunStatus::Skipped,
        "error" => RunStatus::Error,
        "paused" => RunStatus::Paused,
        "cancelled" => RunStatus::Cancelled,
        _ => RunStatus::Running,
    }
}

fn session_to_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::Provisioning => "provisioning",
        SessionStatus::Active => "active",
        SessionStatus::Completed => "completed",
        SessionStatus::Error => "error",
    }
}

fn str_to_session(s: &str) -> SessionStatus {
    match s {
        "active" => SessionStatus::Active,
        "completed" => SessionStatus::Completed,
        "error" => SessionStatus::Error,
        _ => SessionStatus::Provisioning,
    }
}

fn role_to_str(r: MessageRole) -> &'static str {
    match r {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::ToolResult => "tool_result",
        MessageRole::System => "system",
    }
}

fn str_to_role(s: &str) -> MessageRole {
    match s {
        "assistant" => MessageRole::Assistant,
        "tool_result" => MessageRole::ToolResult,
        "system" => MessageRole::System,
        _ => MessageRole::User,
    }
}

fn tc_status_to_str(s: ToolCallStatus) -> &'static str {
    match s {
        ToolCallStatus::Completed => "completed",
        ToolCallStatus::Error => "error",
    }
}

fn str_to_tc_status(s: &str) -> ToolCallStatus {
    match s {
        "error" => ToolCallStatus::Error,
        _ => ToolCallStatus::Completed,
    }
}

fn plog_status_to_str(s: ProcessingLogStatus) -> &'static str {
    match s {
        ProcessingLogStatus::Pending => "pending",
        ProcessingLogStatus::Processing => "processing",
        ProcessingLogStatus::Completed => "completed",
        ProcessingLogStatus::Failed => "failed",
        ProcessingLogStatus::Abandoned => "abandoned",
        ProcessingLogStatus::Skipped => "skipped",
    }
}

fn str_to_plog_status(s: &str) -> ProcessingLogStatus {
    match s {
        "processing" => ProcessingLogStatus::Processing,
        "completed" => ProcessingLogStatus::Completed,
        "failed" => ProcessingLogStatus::Failed,
        "abandoned" => ProcessingLogStatus::Abandoned,
        "skipped" => ProcessingLogStatus::Skipped,
        _ => ProcessingLogStatus::Pending,
    }
}

fn qstatus_to_str(s: QuestionStatus) -> &'static str {
    match s {
        QuestionStatus::Pending => "pending",
        QuestionStatus::Answered => "answered",
        QuestionStatus::Expired => "expired",
        QuestionStatus::Cancelled => "cancelled",
    }
}

fn str_to_qstatus(s: &str) -> QuestionStatus {
    match s {
        "answered" => QuestionStatus::Answered,
        "expired" => QuestionStatus::Expired,
        "cancelled" => QuestionStatus::Cancelled,
        _ => QuestionStatus::Pending,
    }
}

/// SQLite-backed run state store. Own database, independent of any other subsystem's storage.
/// Each operation opens a fresh connection under `spawn_blocking`, matching the pattern used
/// for the engine's other SQLite-backed stores: no connection pool, no lock held across await.
pub struct SqliteRunStore {
    db_path: std::path::PathBuf,
}

impl SqliteRunStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS agent_runs (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                completed_at INTEGER,
                duration_ms INTEGER,
                summary TEXT,
                error_message TEXT,
                skip_reason TEXT,
                parent_run_id TEXT,
                resumed_from TEXT,
                step_count INTEGER NOT NULL,
                max_steps INTEGER NOT NULL,
                session_status TEXT NOT NULL,
                workspace_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_agent_runs_project ON agent_runs(project_id);
            CREATE INDEX IF NOT EXISTS idx_agent_runs_agent ON agent_runs(agent_id);

            CREATE TABLE IF NOT EXISTS agent_run_messages (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                step_number INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_run ON agent_run_messages(run_id, created_at);

            CREATE TABLE IF NOT EXISTS agent_run_tool_calls (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                message_id TEXT,
                tool_name TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT NOT NULL,
                status TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                step_number INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tool_calls_run ON agent_run_tool_calls(run_id);

            CREATE TABLE IF NOT EXISTS agent_processing_log (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                object_id TEXT NOT NULL,
                object_version TEXT NOT NULL,
                event_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_plog_lookup
                ON agent_processing_log(agent_id, object_id, object_version, event_type);

            CREATE TABLE IF NOT EXISTS agent_questions (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                question TEXT NOT NULL,
                options TEXT NOT NULL,
                status TEXT NOT NULL,
                response TEXT,
                responder_id TEXT,
                notification_id TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_questions_run ON agent_questions(run_id);
            CREATE INDEX IF NOT EXISTS idx_questions_project ON agent_questions(project_id);
            "#,
        )
        .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(Self { db_path })
    }

    fn open(&self) -> Result<rusqlite::Connection, StoreError> {
        rusqlite::Connection::open(&self.db_path).map_err(|e| StoreError::Storage(e.to_string()))
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<AgentRun> {
        let summary: Option<String> = row.get("summary")?;
        Ok(AgentRun {
            id: row.get("id")?,
            agent_id: row.get("agent_id")?,
            project_id: row.get("project_id")?,
            status: str_to_status(&row.get::<_, String>("status")?),
            started_at: ms_to_time(row.get("started_at")?),
            completed_at: row.get::<_, Option<i64>>("completed_at")?.map(ms_to_time),
            duration_ms: row.get::<_, Option<i64>>("duration_ms")?.map(|v| v as u64),
            summary: summary.and_then(|s| serde_json::from_str(&s).ok()),
            error_message: row.get("error_message")?,
            skip_reason: row.get("skip_reason")?,
            parent_run_id: row.get("parent_run_id")?,
            resumed_from: row.get("resumed_from")?,
            step_count: row.get::<_, i64>("step_count")? as u32,
            max_steps: row.get::<_, i64>("max_steps")? as u32,
            session_status: str_to_session(&row.get::<_, String>("session_status")?),
            workspace_id: row.get("workspace_id")?,
        })
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn create_run(&self, options: CreateRunOptions) -> Result<AgentRun, StoreError> {
        let run = AgentRun {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: options.agent_id,
            project_id: options.project_id,
            status: RunStatus::Running,
            started_at: SystemTime::now(),
            completed_at: None,
            duration_ms: None,
            summary: None,
            error_message: None,
            skip_reason: None,
            parent_run_id: options.parent_run_id,
            resumed_from: options.resumed_from,
            step_count: options.initial_step_count,
            max_steps: options.max_steps,
            session_status: SessionStatus::Provisioning,
            workspace_id: None,
        };
        let db_path = self.db_path.clone();
        let r = run.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute(
                "INSERT INTO agent_runs
                 (id, agent_id, project_id, status, started_at, completed_at, duration_ms,
                  summary, error_message, skip_reason, parent_run_id, resumed_from,
                  step_count, max_steps, session_status, workspace_id)
                 VALUES (?1,?2,?3,?4,?5,NULL,NULL,NULL,NULL,NULL,?6,?7,?8,?9,?10,NULL)",
                params![
                    r.id,
                    r.agent_id,
                    r.project_id,
                    status_to_str(r.status),
                    now_ms(),
                    r.parent_run_id,
                    r.resumed_from,
                    r.step_count as i64,
                    r.max_steps as i64,
                    session_to_str(r.session_status),
                ],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))??;
        Ok(run)
    }

    async fn pause_run(&self, id: &str, step_count: u32) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute(
                "UPDATE agent_runs SET status = ?1, completed_at = ?2, step_count = ?3
                 WHERE id = ?4 AND status NOT IN ('success','error','cancelled','skipped')",
                params![status_to_str(RunStatus::Paused), now_ms(), step_count as i64, id],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn complete_run(
        &self,
        id: &str,
        summary: Value,
        steps: u32,
        duration_ms: u64,
    ) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        let summary_json =
            serde_json::to_string(&summary).map_err(|e| StoreError::Serialization(e.to_string()))?;
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute(
                "UPDATE agent_runs SET status = ?1, completed_at = ?2, duration_ms = ?3,
                 summary = ?4, step_count = ?5, session_status = ?6 WHERE id = ?7",
                params![
                    status_to_str(RunStatus::Success),
                    now_ms(),
                    duration_ms as i64,
                    summary_json,
                    steps as i64,
                    session_to_str(SessionStatus::Completed),
                    id,
                ],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn fail_run(&self, id: &str, error: &str, steps: u32) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        let error = error.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute(
                "UPDATE agent_runs SET status = ?1, completed_at = ?2, error_message = ?3,
                 step_count = ?4, session_status = ?5 WHERE id = ?6",
                params![
                    status_to_str(RunStatus::Error),
                    now_ms(),
                    error,
                    steps as i64,
                    session_to_str(SessionStatus::Error),
                    id,
                ],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn cancel_run(&self, id: &str) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute(
                "UPDATE agent_runs SET status = ?1, completed_at = ?2 WHERE id = ?3",
                params![status_to_str(RunStatus::Cancelled), now_ms(), id],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn update_step_count(&self, id: &str, n: u32) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute(
                "UPDATE agent_runs SET step_count = ?1 WHERE id = ?2",
                params![n as i64, id],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn set_workspace(
        &self,
        id: &str,
        workspace_id: Option<&str>,
        session_status: SessionStatus,
    ) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        let workspace_id = workspace_id.map(String::from);
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute(
                "UPDATE agent_runs SET workspace_id = ?1, session_status = ?2 WHERE id = ?3",
                params![workspace_id, session_to_str(session_status), id],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn create_message(&self, mut msg: AgentRunMessage) -> Result<AgentRunMessage, StoreError> {
        msg.id = uuid::Uuid::new_v4().to_string();
        msg.created_at = SystemTime::now();
        let db_path = self.db_path.clone();
        let m = msg.clone();
        let content_json =
            serde_json::to_string(&m.content).map_err(|e| StoreError::Serialization(e.to_string()))?;
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute(
                "INSERT INTO agent_run_messages (id, run_id, role, content, step_number, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6)",
                params![
                    m.id,
                    m.run_id,
                    role_to_str(m.role),
                    content_json,
                    m.step_number as i64,
                    now_ms(),
                ],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))??;
        Ok(msg)
    }

    async fn create_tool_call(
        &self,
        mut tc: AgentRunToolCall,
    ) -> Result<AgentRunToolCall, StoreError> {
        tc.id = uuid::Uuid::new_v4().to_string();
        tc.created_at = SystemTime::now();
        let db_path = self.db_path.clone();
        let t = tc.clone();
        let input_json =
            serde_json::to_string(&t.input).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let output_json =
            serde_json::to_string(&t.output).map_err(|e| StoreError::Serialization(e.to_string()))?;
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute(
                "INSERT INTO agent_run_tool_calls
                 (id, run_id, message_id, tool_name, input, output, status, duration_ms, step_number, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                params![
                    t.id,
                    t.run_id,
                    t.message_id,
                    t.tool_name,
                    input_json,
                    output_json,
                    tc_status_to_str(t.status),
                    t.duration_ms as i64,
                    t.step_number as i64,
                    now_ms(),
                ],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))??;
        Ok(tc)
    }

    async fn find_messages_by_run(&self, id: &str) -> Result<Vec<AgentRunMessage>, StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, run_id, role, content, step_number, created_at
                     FROM agent_run_messages WHERE run_id = ?1 ORDER BY created_at ASC",
                )
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![id], |row| {
                    let content: String = row.get(3)?;
                    Ok(AgentRunMessage {
                        id: row.get(0)?,
                        run_id: row.get(1)?,
                        role: str_to_role(&row.get::<_, String>(2)?),
                        content: serde_json::from_str(&content).unwrap_or(Value::Null),
                        step_number: row.get::<_, i64>(4)? as u32,
                        created_at: ms_to_time(row.get(5)?),
                    })
                })
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn find_run_by_id(&self, id: &str) -> Result<Option<AgentRun>, StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.query_row(
                "SELECT * FROM agent_runs WHERE id = ?1",
                params![id],
                Self::row_to_run,
            )
            .optional_store()
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn find_run_by_id_for_project(
        &self,
        id: &str,
        project_id: &str,
    ) -> Result<Option<AgentRun>, StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        let project_id = project_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.query_row(
                "SELECT * FROM agent_runs WHERE id = ?1 AND project_id = ?2",
                params![id, project_id],
                Self::row_to_run,
            )
            .optional_store()
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn find_runs_by_project_paginated(
        &self,
        project_id: &str,
        filters: RunFilters,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<AgentRun>, StoreError> {
        let db_path = self.db_path.clone();
        let project_id = project_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let mut sql = String::from("SELECT * FROM agent_runs WHERE project_id = ?1");
            if filters.agent_id.is_some() {
                sql.push_str(" AND agent_id = ?2");
            }
            if filters.status.is_some() {
                sql.push_str(if filters.agent_id.is_some() {
                    " AND status = ?3"
                } else {
                    " AND status = ?2"
                });
            }
            sql.push_str(" ORDER BY started_at DESC LIMIT ? OFFSET ?");

            let mut stmt = conn.prepare(&sql).map_err(|e| StoreError::Storage(e.to_string()))?;
            let mut param_values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(project_id)];
            if let Some(a) = &filters.agent_id {
                param_values.push(Box::new(a.clone()));
            }
            if let Some(s) = filters.status {
                param_values.push(Box::new(status_to_str(s)));
            }
            param_values.push(Box::new(limit as i64));
            param_values.push(Box::new(offset as i64));
            let refs: Vec<&dyn rusqlite::ToSql> = param_values.iter().map(|b| b.as_ref()).collect();

            let rows = stmt
                .query_map(refs.as_slice(), Self::row_to_run)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn create_processing_log(
        &self,
        mut log: AgentProcessingLog,
    ) -> Result<AgentProcessingLog, StoreError> {
        log.id = uuid::Uuid::new_v4().to_string();
        log.created_at = SystemTime::now();
        log.updated_at = log.created_at;
        let db_path = self.db_path.clone();
        let l = log.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute(
                "INSERT INTO agent_processing_log
                 (id, agent_id, object_id, object_version, event_type, status, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?7)",
                params![
                    l.id,
                    l.agent_id,
                    l.object_id,
                    l.object_version,
                    l.event_type,
                    plog_status_to_str(l.status),
                    now_ms(),
                ],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))??;
        Ok(log)
    }

    async fn find_pending_or_processing(
        &self,
        agent_id: &str,
        object_id: &str,
        object_version: &str,
        event_type: &str,
    ) -> Result<Option<AgentProcessingLog>, StoreError> {
        let db_path = self.db_path.clone();
        let (agent_id, object_id, object_version, event_type) = (
            agent_id.to_string(),
            object_id.to_string(),
            object_version.to_string(),
            event_type.to_string(),
        );
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.query_row(
                "SELECT id, agent_id, object_id, object_version, event_type, status, created_at, updated_at
                 FROM agent_processing_log
                 WHERE agent_id = ?1 AND object_id = ?2 AND object_version = ?3 AND event_type = ?4
                 AND status IN ('pending', 'processing') LIMIT 1",
                params![agent_id, object_id, object_version, event_type],
                |row| {
                    Ok(AgentProcessingLog {
                        id: row.get(0)?,
                        agent_id: row.get(1)?,
                        object_id: row.get(2)?,
                        object_version: row.get(3)?,
                        event_type: row.get(4)?,
                        status: str_to_plog_status(&row.get::<_, String>(5)?),
                        created_at: ms_to_time(row.get(6)?),
                        updated_at: ms_to_time(row.get(7)?),
                    })
                },
            )
            .optional_store()
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn mark_processing_log_status(
        &self,
        id: &str,
        status: ProcessingLogStatus,
    ) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute(
                "UPDATE agent_processing_log SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![plog_status_to_str(status), now_ms(), id],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn mark_stuck_jobs_as_abandoned(
        &self,
        older_than: std::time::Duration,
    ) -> Result<u64, StoreError> {
        let db_path = self.db_path.clone();
        let cutoff = now_ms() - older_than.as_millis() as i64;
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let n = conn
                .execute(
                    "UPDATE agent_processing_log SET status = 'abandoned', updated_at = ?1
                     WHERE status IN ('pending','processing') AND updated_at < ?2",
                    params![now_ms(), cutoff],
                )
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<u64, StoreError>(n as u64)
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn create_question(
        &self,
        run_id: &str,
        agent_id: &str,
        project_id: &str,
        question: &str,
        options: Vec<QuestionOption>,
    ) -> Result<AgentQuestion, StoreError> {
        let q = AgentQuestion {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            agent_id: agent_id.to_string(),
            project_id: project_id.to_string(),
            question: question.to_string(),
            options,
            status: QuestionStatus::Pending,
            response: None,
            responder_id: None,
            notification_id: None,
            created_at: SystemTime::now(),
        };
        let db_path = self.db_path.clone();
        let saved = q.clone();
        let options_json = serde_json::to_string(&saved.options)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute(
                "INSERT INTO agent_questions
                 (id, run_id, agent_id, project_id, question, options, status, response,
                  responder_id, notification_id, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,NULL,NULL,NULL,?8)",
                params![
                    saved.id,
                    saved.run_id,
                    saved.agent_id,
                    saved.project_id,
                    saved.question,
                    options_json,
                    qstatus_to_str(saved.status),
                    now_ms(),
                ],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))??;
        Ok(q)
    }

    async fn find_question_by_id(&self, id: &str) -> Result<Option<AgentQuestion>, StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.query_row(
                "SELECT * FROM agent_questions WHERE id = ?1",
                params![id],
                row_to_question,
            )
            .optional_store()
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn cancel_pending_questions_for_run(&self, run_id: &str) -> Result<u64, StoreError> {
        let db_path = self.db_path.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let n = conn
                .execute(
                    "UPDATE agent_questions SET status = 'cancelled' WHERE run_id = ?1 AND status = 'pending'",
                    params![run_id],
                )
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<u64, StoreError>(n as u64)
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn link_question_notification(
        &self,
        id: &str,
        notification_id: &str,
    ) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        let notification_id = notification_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute(
                "UPDATE agent_questions SET notification_id = ?1 WHERE id = ?2",
                params![notification_id, id],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn answer_question(
        &self,
        id: &str,
        response: &str,
        responder_id: &str,
    ) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        let response = response.to_string();
        let responder_id = responder_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute(
                "UPDATE agent_questions SET status = 'answered', response = ?1, responder_id = ?2
                 WHERE id = ?3",
                params![response, responder_id, id],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn list_questions_by_run(&self, run_id: &str) -> Result<Vec<AgentQuestion>, StoreError> {
        let db_path = self.db_path.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let mut stmt = conn
                .prepare("SELECT * FROM agent_questions WHERE run_id = ?1 ORDER BY created_at ASC")
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![run_id], row_to_question)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn list_questions_by_project(
        &self,
        project_id: &str,
        status: Option<QuestionStatus>,
    ) -> Result<Vec<AgentQuestion>, StoreError> {
        let db_path = self.db_path.clone();
        let project_id = project_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let (sql, status_str) = match status {
                Some(s) => (
                    "SELECT * FROM agent_questions WHERE project_id = ?1 AND status = ?2 ORDER BY created_at DESC",
                    Some(qstatus_to_str(s)),
                ),
                None => (
                    "SELECT * FROM agent_questions WHERE project_id = ?1 ORDER BY created_at DESC",
                    None,
                ),
            };
            let mut stmt = conn.prepare(sql).map_err(|e| StoreError::Storage(e.to_string()))?;
            let rows = if let Some(s) = status_str {
                stmt.query_map(params![project_id, s], row_to_question)
            } else {
                stmt.query_map(params![project_id], row_to_question)
            }
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }
}

fn row_to_question(row: &rusqlite::Row) -> rusqlite::Result<AgentQuestion> {
    let options: String = row.get("options")?;
    Ok(AgentQuestion {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        agent_id: row.get("agent_id")?,
        project_id: row.get("project_id")?,
        question: row.get("question")?,
        options: serde_json::from_str(&options).unwrap_or_default(),
        status: str_to_qstatus(&row.get::<_, String>("status")?),
        response: row.get("response")?,
        responder_id: row.get("responder_id")?,
        notification_id: row.get("notification_id")?,
        created_at: ms_to_time(row.get("created_at")?),
    })
}

trait OptionalStore<T> {
    fn optional_store(self) -> Result<Option<T>, StoreError>;
}

impl<T> OptionalStore<T> for rusqlite::Result<T> {
    fn optional_store(self) -> Result<Option<T>, StoreError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Storage(e.to_string())),
        }
    }
}
