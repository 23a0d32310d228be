//! Coordination Tools: `list_available_agents` and `spawn_agents`, the LLM's entry points
//! into recursive agent execution.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::executor::{ExecuteOutcome, ExecuteRequest};
use crate::model::{Agent, AgentDefinition, AgentRun, RunStatus};
use crate::store::RunStore;
use crate::tool_source::{ToolCallContent, ToolCallContext, ToolSourceError, ToolSpec};
use crate::tools::Tool;

pub const TOOL_LIST_AVAILABLE_AGENTS: &str = "list_available_agents";
pub const TOOL_SPAWN_AGENTS: &str = "spawn_agents";

/// External collaborator: the project's agent catalog. Internal-visibility definitions are
/// included in every listing — coordination tools need a complete view of the project.
#[async_trait]
pub trait AgentCatalog: Send + Sync {
    async fn list_definitions(&self, project_id: &str) -> Result<Vec<AgentDefinition>, String>;
    async fn find_definition(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Option<AgentDefinition>, String>;
    async fn find_agent(&self, project_id: &str, name: &str) -> Result<Option<Agent>, String>;

    /// Looks up a runtime [`Agent`] binding by id, regardless of project — used by the
    /// Trigger Service's scheduler closures, which only carry the id encoded in the task
    /// name (`"agent:<id>"`).
    async fn find_agent_by_id(&self, agent_id: &str) -> Result<Option<Agent>, String>;

    /// Enabled agents of the given trigger type, across every project — used for the
    /// Trigger Service's startup sync and has no project-scoped equivalent.
    async fn list_enabled_agents_by_trigger_type(
        &self,
        trigger_type: crate::model::TriggerType,
    ) -> Result<Vec<Agent>, String>;
}

/// What `spawn_agents` calls back into. Implemented by [`crate::executor::Executor`]; kept
/// as a trait so coordination tools don't need to depend on the concrete Executor type.
#[async_trait]
pub trait RunLauncher: Send + Sync {
    async fn launch(self: Arc<Self>, req: ExecuteRequest) -> Result<ExecuteOutcome, AgentError>;
    async fn launch_resume(
        self: Arc<Self>,
        prior: &AgentRun,
        req: ExecuteRequest,
    ) -> Result<ExecuteOutcome, AgentError>;
}

pub struct ListAvailableAgentsTool {
    catalog: Arc<dyn AgentCatalog>,
    project_id: String,
}

impl ListAvailableAgentsTool {
    pub fn new(catalog: Arc<dyn AgentCatalog>, project_id: String) -> Self {
        Self { catalog, project_id }
    }
}

#[async_trait]
impl Tool for ListAvailableAgentsTool {
    fn name(&self) -> &str {
        TOOL_LIST_AVAILABLE_AGENTS
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_LIST_AVAILABLE_AGENTS.to_string(),
            description: Some("List agent definitions available in this project.".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(
        &self,
        _args: Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        let defs = self
            .catalog
            .list_definitions(&self.project_id)
            .await
            .map_err(ToolSourceError::Transport)?;
        let agents: Vec<Value> = defs
            .iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "description": d.description,
                    "tools": d.tools_whitelist,
                    "flow_type": d.flow_type,
                    "visibility": d.visibility,
                })
            })
            .collect();
        Ok(ToolCallContent::single(
            json!({ "agents": agents, "count": agents.len() }).to_string(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SpawnAgentRequest {
    agent_name: String,
    task: String,
    timeout_seconds: Option<u64>,
    resume_run_id: Option<String>,
}

pub struct SpawnAgentsTool {
    catalog: Arc<dyn AgentCatalog>,
    store: Arc<dyn RunStore>,
    launcher: Arc<dyn RunLauncher>,
    project_id: String,
    parent_depth: u32,
    max_depth: u32,
    parent_run_id: String,
    parent_cancel: CancellationToken,
}

impl SpawnAgentsTool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<dyn AgentCatalog>,
        store: Arc<dyn RunStore>,
        launcher: Arc<dyn RunLauncher>,
        project_id: String,
        parent_depth: u32,
        max_depth: u32,
        parent_run_id: String,
        parent_cancel: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            store,
            launcher,
            project_id,
            parent_depth,
            max_depth,
            parent_run_id,
            parent_cancel,
        }
    }

    /// Resolves and launches one spawn request; every failure mode produces a per-request
    /// error result rather than failing the whole `spawn_agents` call.
    async fn spawn_one(&self, req: SpawnAgentRequest) -> Value {
        let definition = match self.catalog.find_definition(&self.project_id, &req.agent_name).await {
            Ok(Some(d)) => d,
            Ok(None) => return error_result(&req.agent_name, format!("unknown agent: {}", req.agent_name)),
            Err(e) => return error_result(&req.agent_name, e),
        };

        let agent_id = match self.catalog.find_agent(&self.project_id, &req.agent_name).await {
            Ok(Some(agent)) => agent.id,
            // No runtime binding yet: synthesize a transient id from the definition so the
            // run still has something to key on.
            Ok(None) => format!("transient:{}", req.agent_name),
            Err(_) => format!("transient:{}", req.agent_name),
        };

        let timeout = req
            .timeout_seconds
            .map(Duration::from_secs)
            .or(definition.default_timeout);

        let child_req = ExecuteRequest {
            agent_id,
            agent_definition: Some(definition),
            project_id: self.project_id.clone(),
            user_message: req.task.clone(),
            parent_run_id: Some(self.parent_run_id.clone()),
            max_steps_override: None,
            timeout,
            depth: self.parent_depth + 1,
            max_depth: self.max_depth,
            trigger_source: "spawn_agents".to_string(),
            stream: None,
            parent_cancel: Some(self.parent_cancel.clone()),
        };

        let outcome: Result<ExecuteOutcome, String> = if let Some(resume_id) = &req.resume_run_id {
            match self.store.find_run_by_id(resume_id).await {
                Ok(Some(prior)) if prior.status == RunStatus::Paused => self
                    .launcher
                    .clone()
                    .launch_resume(&prior, child_req)
                    .await
                    .map_err(|e| e.to_string()),
                Ok(Some(_)) => Err(format!("run {} is not paused", resume_id)),
                Ok(None) => Err(format!("unknown run: {}", resume_id)),
                Err(e) => Err(e.to_string()),
            }
        } else {
            self.launcher.clone().launch(child_req).await.map_err(|e| e.to_string())
        };

        match outcome {
            Ok(o) => json!({
                "agent_name": req.agent_name,
                "run_id": o.run_id,
                "status": serde_json::to_value(&o.status).unwrap_or(Value::Null),
                "summary": o.summary,
                "steps": o.summary.get("steps").cloned().unwrap_or(Value::Null),
            }),
            Err(e) => error_result(&req.agent_name, e),
        }
    }
}

fn error_result(agent_name: &str, error: impl std::fmt::Display) -> Value {
    json!({ "agent_name": agent_name, "status": "error", "error": error.to_string() })
}

#[async_trait]
impl Tool for SpawnAgentsTool {
    fn name(&self) -> &str {
        TOOL_SPAWN_AGENTS
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_SPAWN_AGENTS.to_string(),
            description: Some(
                "Spawn one or more agents in parallel and wait for all of them to finish."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "requests": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "agent_name": {"type": "string"},
                                "task": {"type": "string"},
                                "timeout_seconds": {"type": "integer"},
                                "resume_run_id": {"type": "string"}
                            },
                            "required": ["agent_name", "task"]
                        }
                    }
                },
                "required": ["requests"]
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        let raw = args
            .get("requests")
            .or_else(|| args.get("agents"))
            .ok_or_else(|| ToolSourceError::InvalidInput("requests (or agents) is required".into()))?;
        let requests: Vec<SpawnAgentRequest> = serde_json::from_value(raw.clone())
            .map_err(|e| ToolSourceError::InvalidInput(format!("invalid requests: {}", e)))?;
        if requests.is_empty() {
            return Err(ToolSourceError::InvalidInput(
                "at least one request is required".into(),
            ));
        }

        let results = futures::future::join_all(requests.into_iter().map(|r| self.spawn_one(r))).await;
        let total = results.len();
        Ok(ToolCallContent::single(
            json!({ "results": results, "total": total }).to_string(),
        ))
    }
}
