//! In-memory [`RunStore`]. For tests and ephemeral dev runs; no persistence across restarts.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::Value;

use crate::model::{
    AgentProcessingLog, AgentQuestion, AgentRun, AgentRunMessage, AgentRunToolCall,
    CreateRunOptions, ProcessingLogStatus, QuestionOption, QuestionStatus, RunStatus,
    SessionStatus,
};

use super::{RunFilters, RunStore, StoreError};

#[derive(Default)]
struct Inner {
    runs: HashMap<String, AgentRun>,
    messages: HashMap<String, Vec<AgentRunMessage>>,
    tool_calls: HashMap<String, Vec<AgentRunToolCall>>,
    processing_log: HashMap<String, AgentProcessingLog>,
    questions: HashMap<String, AgentQuestion>,
}

/// Everything lives behind a single mutex; in-memory ops never block on I/O so there is no
/// benefit to finer-grained locking here.
#[derive(Default)]
pub struct InMemoryRunStore {
    inner: Mutex<Inner>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
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
        let mut inner = self.inner.lock().unwrap();
        inner.runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    async fn pause_run(&self, id: &str, step_count: u32) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(run) = inner.runs.get_mut(id) {
            if !run.status.is_terminal() {
                run.status = RunStatus::Paused;
                run.completed_at = Some(SystemTime::now());
                run.step_count = step_count;
            }
        }
        Ok(())
    }

    async fn complete_run(
        &self,
        id: &str,
        summary: Value,
        steps: u32,
        duration_ms: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        run.status = RunStatus::Success;
        run.completed_at = Some(SystemTime::now());
        run.duration_ms = Some(duration_ms);
        run.summary = Some(summary);
        run.step_count = steps;
        run.session_status = SessionStatus::Completed;
        Ok(())
    }

    async fn fail_run(&self, id: &str, error: &str, steps: u32) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        run.status = RunStatus::Error;
        run.completed_at = Some(SystemTime::now());
        run.error_message = Some(error.to_string());
        run.step_count = steps;
        run.session_status = SessionStatus::Error;
        Ok(())
    }

    async fn cancel_run(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(run) = inner.runs.get_mut(id) {
            run.status = RunStatus::Cancelled;
            run.completed_at = Some(SystemTime::now());
        }
        Ok(())
    }

    async fn update_step_count(&self, id: &str, n: u32) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(run) = inner.runs.get_mut(id) {
            run.step_count = n;
        }
        Ok(())
    }

    async fn set_workspace(
        &self,
        id: &str,
        workspace_id: Option<&str>,
        session_status: SessionStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(run) = inner.runs.get_mut(id) {
            run.workspace_id = workspace_id.map(String::from);
            run.session_status = session_status;
        }
        Ok(())
    }

    async fn create_message(&self, mut msg: AgentRunMessage) -> Result<AgentRunMessage, StoreError> {
        msg.id = uuid::Uuid::new_v4().to_string();
        msg.created_at = SystemTime::now();
        let mut inner = self.inner.lock().unwrap();
        inner
            .messages
            .entry(msg.run_id.clone())
            .or_default()
            .push(msg.clone());
        Ok(msg)
    }

    async fn create_tool_call(
        &self,
        mut tc: AgentRunToolCall,
    ) -> Result<AgentRunToolCall, StoreError> {
        tc.id = uuid::Uuid::new_v4().to_string();
        tc.created_at = SystemTime::now();
        let mut inner = self.inner.lock().unwrap();
        inner
            .tool_calls
            .entry(tc.run_id.clone())
            .or_default()
            .push(tc.clone());
        Ok(tc)
    }

    async fn find_messages_by_run(&self, id: &str) -> Result<Vec<AgentRunMessage>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.messages.get(id).cloned().unwrap_or_default())
    }

    async fn find_run_by_id(&self, id: &str) -> Result<Option<AgentRun>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.runs.get(id).cloned())
    }

    async fn find_run_by_id_for_project(
        &self,
        id: &str,
        project_id: &str,
    ) -> Result<Option<AgentRun>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .runs
            .get(id)
            .filter(|r| r.project_id == project_id)
            .cloned())
    }

    async fn find_runs_by_project_paginated(
        &self,
        project_id: &str,
        filters: RunFilters,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<AgentRun>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut matched: Vec<AgentRun> = inner
            .runs
            .values()
            .filter(|r| r.project_id == project_id)
            .filter(|r| filters.agent_id.as_deref().map(|a| a == r.agent_id).unwrap_or(true))
            .filter(|r| filters.status.map(|s| s == r.status).unwrap_or(true))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(matched
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn create_processing_log(
        &self,
        mut log: AgentProcessingLog,
    ) -> Result<AgentProcessingLog, StoreError> {
        log.id = uuid::Uuid::new_v4().to_string();
        log.created_at = SystemTime::now();
        log.updated_at = log.created_at;
        let mut inner = self.inner.lock().unwrap();
        inner.processing_log.insert(log.id.clone(), log.clone());
        Ok(log)
    }

    async fn find_pending_or_processing(
        &self,
        agent_id: &str,
        object_id: &str,
        object_version: &str,
        event_type: &str,
    ) -> Result<Option<AgentProcessingLog>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .processing_log
            .values()
            .find(|l| {
                l.agent_id == agent_id
                    && l.object_id == object_id
                    && l.object_version == object_version
                    && l.event_type == event_type
                    && matches!(
                        l.status,
                        ProcessingLogStatus::Pending | ProcessingLogStatus::Processing
                    )
            })
            .cloned())
    }

    async fn mark_processing_log_status(
        &self,
        id: &str,
        status: ProcessingLogStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(l) = inner.processing_log.get_mut(id) {
            l.status = status;
            l.updated_at = SystemTime::now();
        }
        Ok(())
    }

    async fn mark_stuck_jobs_as_abandoned(
        &self,
        older_than: std::time::Duration,
    ) -> Result<u64, StoreError> {
        let cutoff = SystemTime::now() - older_than;
        let mut inner = self.inner.lock().unwrap();
        let mut n = 0u64;
        for l in inner.processing_log.values_mut() {
            if matches!(
                l.status,
                ProcessingLogStatus::Pending | ProcessingLogStatus::Processing
            ) && l.updated_at < cutoff
            {
                l.status = ProcessingLogStatus::Abandoned;
                l.updated_at = SystemTime::now();
                n += 1;
            }
        }
        Ok(n)
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
        let mut inner = self.inner.lock().unwrap();
        inner.questions.insert(q.id.clone(), q.clone());
        Ok(q)
    }

    async fn find_question_by_id(&self, id: &str) -> Result<Option<AgentQuestion>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.questions.get(id).cloned())
    }

    async fn cancel_pending_questions_for_run(&self, run_id: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut n = 0u64;
        for q in inner.questions.values_mut() {
            if q.run_id == run_id && q.status == QuestionStatus::Pending {
                q.status = QuestionStatus::Cancelled;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn link_question_notification(
        &self,
        id: &str,
        notification_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(q) = inner.questions.get_mut(id) {
            q.notification_id = Some(notification_id.to_string());
        }
        Ok(())
    }

    async fn answer_question(
        &self,
        id: &str,
        response: &str,
        responder_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let q = inner
            .questions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        q.status = QuestionStatus::Answered;
        q.response = Some(response.to_string());
        q.responder_id = Some(responder_id.to_string());
        Ok(())
    }

    async fn list_questions_by_run(&self, run_id: &str) -> Result<Vec<AgentQuestion>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut list: Vec<AgentQuestion> = inner
            .questions
            .values()
            .filter(|q| q.run_id == run_id)
            .cloned()
            .collect();
        list.sort_by_key(|q| q.created_at);
        Ok(list)
    }

    async fn list_questions_by_project(
        &self,
        project_id: &str,
        status: Option<QuestionStatus>,
    ) -> Result<Vec<AgentQuestion>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut list: Vec<AgentQuestion> = inner
            .questions
            .values()
            .filter(|q| q.project_id == project_id)
            .filter(|q| status.map(|s| s == q.status).unwrap_or(true))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pause_then_complete_is_a_noop_on_terminal_run() {
        let store = InMemoryRunStore::new();
        let run = store
            .create_run(CreateRunOptions {
                agent_id: "a".into(),
                project_id: "p".into(),
                parent_run_id: None,
                resumed_from: None,
                initial_step_count: 0,
                max_steps: 10,
            })
            .await
            .unwrap();
        store.complete_run(&run.id, Value::Null, 3, 10).await.unwrap();
        store.pause_run(&run.id, 99).await.unwrap();
        let reloaded = store.find_run_by_id(&run.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, RunStatus::Success);
        assert_eq!(reloaded.step_count, 3);
    }

    #[tokio::test]
    async fn only_one_pending_question_per_run_after_cancel() {
        let store = InMemoryRunStore::new();
        store
            .create_question("run-1", "agent-1", "proj-1", "first?", vec![])
            .await
            .unwrap();
        store.cancel_pending_questions_for_run("run-1").await.unwrap();
        store
            .create_question("run-1", "agent-1", "proj-1", "second?", vec![])
            .await
            .unwrap();
        let pending: Vec<_> = store
            .list_questions_by_run("run-1")
            .await
            .unwrap()
            .into_iter()
            .filter(|q| q.status == QuestionStatus::Pending)
            .collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].question, "second?");
    }
}
