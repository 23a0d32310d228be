//! Executor: builds a per-run pipeline, advances it cooperatively, and adjudicates when to
//! stop, pause, or continue.

mod pipeline;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::ask_user::{AskPauseFlag, AskUserTool, UserNotifier};
use crate::coordination::{AgentCatalog, ListAvailableAgentsTool, RunLauncher, SpawnAgentsTool};
use crate::error::AgentError;
use crate::llm_client::ModelFactory;
use crate::message::Message;
use crate::model::{
    limits, AgentDefinition, AgentRun, AgentRunMessage, AgentRunToolCall, CreateRunOptions,
    MessageRole, RunStatus, SessionStatus, ToolCallStatus,
};
use crate::repetition_detector::RepetitionDetector;
use crate::step_tracker::StepTracker;
use crate::store::RunStore;
use crate::tool_pool::{depth_allows, PooledTool, ToolPool};
use crate::tools::Tool;

pub use pipeline::{ExecutorStreamEvent, StreamSink};

/// External collaborator: provisions and tears down a run's sandboxed workspace. Opaque to
/// the engine beyond this surface; provisioning failure degrades the run rather than
/// failing it.
#[async_trait]
pub trait WorkspaceProvisioner: Send + Sync {
    async fn provision(&self, run_id: &str, config: &Value) -> Result<String, String>;
    async fn teardown(&self, workspace_id: &str) -> Result<(), String>;
}

/// Inputs to `Executor::execute` / `Executor::resume`.
pub struct ExecuteRequest {
    pub agent_id: String,
    pub agent_definition: Option<AgentDefinition>,
    pub project_id: String,
    pub user_message: String,
    pub parent_run_id: Option<String>,
    pub max_steps_override: Option<u32>,
    pub timeout: Option<Duration>,
    pub depth: u32,
    pub max_depth: u32,
    pub trigger_source: String,
    pub stream: Option<StreamSink>,
    /// Set by `spawn_agents` so a parent cancellation cascades to this child; `None` for a
    /// top-level run.
    pub parent_cancel: Option<CancellationToken>,
}

#[derive(Debug)]
pub struct ExecuteOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub summary: Value,
}

fn effective_max_depth(max_depth: u32) -> u32 {
    if max_depth == 0 {
        limits::DEFAULT_MAX_DEPTH
    } else {
        max_depth
    }
}

/// Drives runs to completion: creates run records, resolves tools and models, and
/// cooperatively advances the LLM+tool loop until it yields a final answer, a pause, or a
/// terminal failure.
pub struct Executor {
    store: Arc<dyn RunStore>,
    tool_pool: Arc<ToolPool>,
    model_factory: Arc<dyn ModelFactory>,
    workspace: Option<Arc<dyn WorkspaceProvisioner>>,
    notifier: Arc<dyn UserNotifier>,
    /// Backs `list_available_agents` / `spawn_agents`. `None` disables coordination tools.
    catalog: Option<Arc<dyn AgentCatalog>>,
}

#[async_trait]
impl RunLauncher for Executor {
    async fn launch(self: Arc<Self>, req: ExecuteRequest) -> Result<ExecuteOutcome, AgentError> {
        self.execute_inner(req).await
    }

    async fn launch_resume(
        self: Arc<Self>,
        prior: &AgentRun,
        req: ExecuteRequest,
    ) -> Result<ExecuteOutcome, AgentError> {
        self.resume_inner(prior, req).await
    }
}

impl Executor {
    pub fn new(
        store: Arc<dyn RunStore>,
        tool_pool: Arc<ToolPool>,
        model_factory: Arc<dyn ModelFactory>,
        workspace: Option<Arc<dyn WorkspaceProvisioner>>,
        notifier: Arc<dyn UserNotifier>,
        catalog: Option<Arc<dyn AgentCatalog>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            tool_pool,
            model_factory,
            workspace,
            notifier,
            catalog,
        })
    }

    /// Starts a fresh run.
    pub async fn execute(self: &Arc<Self>, req: ExecuteRequest) -> Result<ExecuteOutcome, AgentError> {
        self.execute_inner(req).await
    }

    /// Starts a resume run chained to a paused prior run.
    pub async fn resume(
        self: &Arc<Self>,
        prior: &AgentRun,
        req: ExecuteRequest,
    ) -> Result<ExecuteOutcome, AgentError> {
        self.resume_inner(prior, req).await
    }

    async fn execute_inner(self: &Arc<Self>, req: ExecuteRequest) -> Result<ExecuteOutcome, AgentError> {
        let max_depth = effective_max_depth(req.max_depth);
        if req.depth > max_depth {
            return Err(AgentError::DepthExceeded {
                depth: req.depth,
                max_depth,
            });
        }

        let max_steps = req
            .max_steps_override
            .or(req.agent_definition.as_ref().and_then(|d| d.max_steps))
            .unwrap_or(limits::MAX_TOTAL_STEPS_PER_RUN);

        let run = self
            .store
            .create_run(CreateRunOptions {
                agent_id: req.agent_id.clone(),
                project_id: req.project_id.clone(),
                parent_run_id: req.parent_run_id.clone(),
                resumed_from: None,
                initial_step_count: 0,
                max_steps,
            })
            .await?;

        self.run_pipeline(run, 0, max_depth, req).await
    }

    async fn resume_inner(
        self: &Arc<Self>,
        prior: &AgentRun,
        req: ExecuteRequest,
    ) -> Result<ExecuteOutcome, AgentError> {
        if prior.status != RunStatus::Paused {
            return Err(AgentError::ResumeRefused(format!(
                "prior run {} is not paused (status: {:?})",
                prior.id, prior.status
            )));
        }
        if prior.step_count >= limits::MAX_TOTAL_STEPS_PER_RUN {
            return Err(AgentError::ResumeRefused(format!(
                "prior run {} already reached the global step cap",
                prior.id
            )));
        }

        let max_depth = effective_max_depth(req.max_depth);
        if req.depth > max_depth {
            return Err(AgentError::DepthExceeded {
                depth: req.depth,
                max_depth,
            });
        }

        let max_steps = req
            .max_steps_override
            .or(req.agent_definition.as_ref().and_then(|d| d.max_steps))
            .unwrap_or(limits::MAX_TOTAL_STEPS_PER_RUN);

        let run = self
            .store
            .create_run(CreateRunOptions {
                agent_id: req.agent_id.clone(),
                project_id: req.project_id.clone(),
                parent_run_id: req.parent_run_id.clone(),
                resumed_from: Some(prior.id.clone()),
                initial_step_count: prior.step_count,
                max_steps,
            })
            .await?;

        self.run_pipeline(run, prior.step_count, max_depth, req).await
    }

    async fn resolve_tools(
        self: &Arc<Self>,
        req: &ExecuteRequest,
        max_depth: u32,
        run: &AgentRun,
        pause_flag: &Arc<AskPauseFlag>,
        cancel: &CancellationToken,
    ) -> Result<Vec<PooledTool>, AgentError> {
        let mut tools = self
            .tool_pool
            .resolve(
                &req.project_id,
                req.agent_definition.as_ref(),
                req.depth,
                max_depth,
            )
            .await?;

        let whitelist: &[String] = req
            .agent_definition
            .as_ref()
            .map(|d| d.tools_whitelist.as_slice())
            .unwrap_or(&[]);

        if whitelist.is_empty() || whitelist.iter().any(|w| w == "ask_user" || w == "*") {
            let ask_tool: Arc<dyn Tool> = Arc::new(AskUserTool::new(
                self.store.clone(),
                self.notifier.clone(),
                pause_flag.clone(),
                run.id.clone(),
                req.agent_id.clone(),
                req.project_id.clone(),
            ));
            tools.push(PooledTool::from_builtin(ask_tool));
        }

        if let Some(catalog) = &self.catalog {
            if depth_allows("list_available_agents", req.depth, max_depth, whitelist) {
                let list_tool: Arc<dyn Tool> =
                    Arc::new(ListAvailableAgentsTool::new(catalog.clone(), req.project_id.clone()));
                tools.push(PooledTool::from_builtin(list_tool));
            }
            if depth_allows("spawn_agents", req.depth, max_depth, whitelist) {
                let spawn_tool: Arc<dyn Tool> = Arc::new(SpawnAgentsTool::new(
                    catalog.clone(),
                    self.store.clone(),
                    self.clone() as Arc<dyn RunLauncher>,
                    req.project_id.clone(),
                    req.depth,
                    max_depth,
                    run.id.clone(),
                    cancel.clone(),
                ));
                tools.push(PooledTool::from_builtin(spawn_tool));
            }
        }

        Ok(tools)
    }

    async fn run_pipeline(
        self: &Arc<Self>,
        run: AgentRun,
        cumulative_initial_steps: u32,
        max_depth: u32,
        req: ExecuteRequest,
    ) -> Result<ExecuteOutcome, AgentError> {
        let step_tracker = StepTracker::new(cumulative_initial_steps, run.max_steps);
        let repetition = RepetitionDetector::default();
        let pause_flag = Arc::new(AskPauseFlag::new());
        let cancel = match &req.parent_cancel {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };

        if let Some(timeout) = req.timeout {
            let cancel_for_timeout = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel_for_timeout.cancel();
            });
        }

        let (workspace_id, workspace_degraded) = self.provision_workspace(&run, &req).await;

        let tools = match self
            .resolve_tools(&req, max_depth, &run, &pause_flag, &cancel)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                self.teardown_workspace(&workspace_id).await;
                return Err(e);
            }
        };

        let llm = match self
            .model_factory
            .resolve(req.agent_definition.as_ref().and_then(|d| d.model_name.as_deref()))
            .await
        {
            Ok(l) => l,
            Err(e) => {
                self.teardown_workspace(&workspace_id).await;
                return Err(e);
            }
        };

        let system_prompt = req
            .agent_definition
            .as_ref()
            .map(|d| d.system_prompt.clone())
            .unwrap_or_default();
        let mut messages = vec![Message::system(system_prompt), Message::user(req.user_message.clone())];

        let outcome = pipeline::drive(
            pipeline::DriveArgs {
                store: &self.store,
                run: &run,
                step_tracker: &step_tracker,
                repetition: &repetition,
                pause_flag: &pause_flag,
                cancel: &cancel,
                llm: llm.as_ref(),
                tools: &tools,
                stream: req.stream.as_ref(),
                workspace_id: &workspace_id,
                workspace_degraded,
            },
            &mut messages,
        )
        .await;

        self.teardown_workspace(&workspace_id).await;
        outcome
    }

    async fn provision_workspace(
        &self,
        run: &AgentRun,
        req: &ExecuteRequest,
    ) -> (Option<String>, bool) {
        let (Some(provisioner), Some(def)) = (&self.workspace, req.agent_definition.as_ref()) else {
            return (None, false);
        };
        let Some(config) = &def.workspace_config else {
            return (None, false);
        };

        let _ = self
            .store
            .set_workspace(&run.id, None, SessionStatus::Provisioning)
            .await;

        match provisioner.provision(&run.id, config).await {
            Ok(workspace_id) => {
                let _ = self
                    .store
                    .set_workspace(&run.id, Some(&workspace_id), SessionStatus::Active)
                    .await;
                (Some(workspace_id), false)
            }
            Err(e) => {
                tracing::warn!(run_id = %run.id, error = %e, "workspace provisioning failed, degrading");
                let _ = self
                    .store
                    .set_workspace(&run.id, None, SessionStatus::Active)
                    .await;
                (None, true)
            }
        }
    }

    async fn teardown_workspace(&self, workspace_id: &Option<String>) {
        let (Some(provisioner), Some(workspace_id)) = (&self.workspace, workspace_id) else {
            return;
        };
        let deadline = Duration::from_secs(limits::WORKSPACE_TEARDOWN_TIMEOUT_SECS);
        let start = Instant::now();
        if tokio::time::timeout(deadline, provisioner.teardown(workspace_id))
            .await
            .is_err()
        {
            tracing::warn!(
                workspace_id = %workspace_id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "workspace teardown timed out"
            );
        }
    }
}

/// Builds an `AgentRunMessage` placeholder; the store assigns `id` and `created_at`.
pub(crate) fn pending_message(run_id: &str, role: MessageRole, content: Value, step: u32) -> AgentRunMessage {
    AgentRunMessage {
        id: String::new(),
        run_id: run_id.to_string(),
        role,
        content,
        step_number: step,
        created_at: std::time::SystemTime::now(),
    }
}

/// Builds an `AgentRunToolCall` placeholder; the store assigns `id` and `created_at`.
pub(crate) fn pending_tool_call(
    run_id: &str,
    message_id: Option<String>,
    tool_name: &str,
    input: Value,
    output: Value,
    status: ToolCallStatus,
    duration_ms: u64,
    step: u32,
) -> AgentRunToolCall {
    AgentRunToolCall {
        id: String::new(),
        run_id: run_id.to_string(),
        message_id,
        tool_name: tool_name.to_string(),
        input,
        output,
        status,
        duration_ms,
        step_number: step,
        created_at: std::time::SystemTime::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ask_user::QuestionNotification;
    use crate::llm_client::{LlmClient, LlmResponse, MockLlm};
    use crate::message::ToolCallRequest;
    use crate::store::InMemoryRunStore;
    use crate::tool_pool::EmptyMcpRegistry;
    use crate::tool_source::{ToolCallContent, ToolSource, ToolSourceError, ToolSpec};

    struct NoopNotifier;
    #[async_trait]
    impl UserNotifier for NoopNotifier {
        async fn notify_question(&self, _n: QuestionNotification) -> Result<String, String> {
            Ok("notif".into())
        }
    }

    struct NoToolSource;
    #[async_trait]
    impl ToolSource for NoToolSource {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError> {
            Ok(Vec::new())
        }
        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Value,
        ) -> Result<ToolCallContent, ToolSourceError> {
            Err(ToolSourceError::NotFound("no tools".into()))
        }
    }

    struct FixedModelFactory(Arc<dyn LlmClient>);
    #[async_trait]
    impl ModelFactory for FixedModelFactory {
        async fn resolve(&self, _model_name: Option<&str>) -> Result<Arc<dyn LlmClient>, AgentError> {
            Ok(self.0.clone())
        }
    }

    fn make_executor(llm: Arc<dyn LlmClient>) -> Arc<Executor> {
        let store = Arc::new(InMemoryRunStore::new());
        let tool_pool = Arc::new(ToolPool::new(Arc::new(NoToolSource), Arc::new(EmptyMcpRegistry)));
        Executor::new(
            store,
            tool_pool,
            Arc::new(FixedModelFactory(llm)),
            None,
            Arc::new(NoopNotifier),
            None,
        )
    }

    fn base_request(user_message: &str) -> ExecuteRequest {
        ExecuteRequest {
            agent_id: "agent-1".into(),
            agent_definition: None,
            project_id: "proj-1".into(),
            user_message: user_message.into(),
            parent_run_id: None,
            max_steps_override: Some(5),
            timeout: None,
            depth: 0,
            max_depth: 2,
            trigger_source: "manual".into(),
            stream: None,
            parent_cancel: None,
        }
    }

    #[tokio::test]
    async fn final_text_response_completes_the_run() {
        let llm = Arc::new(MockLlm::fixed("done"));
        let executor = make_executor(llm);
        let outcome = executor.execute(base_request("hello")).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.summary["final_response"], "done");
    }

    #[tokio::test]
    async fn depth_exceeding_max_depth_is_rejected() {
        let llm = Arc::new(MockLlm::fixed("done"));
        let executor = make_executor(llm);
        let mut req = base_request("hi");
        req.depth = 3;
        req.max_depth = 2;
        let err = executor.execute(req).await.unwrap_err();
        assert!(matches!(err, AgentError::DepthExceeded { .. }));
    }

    #[tokio::test]
    async fn step_cap_pauses_the_run() {
        let llm = Arc::new(MockLlm::with_script(vec![
            LlmResponse {
                content: String::new(),
                tool_calls: vec![ToolCallRequest {
                    id: "c1".into(),
                    name: "unknown_tool".into(),
                    arguments: serde_json::json!({}),
                }],
                usage: None,
            },
            LlmResponse {
                content: String::new(),
                tool_calls: vec![ToolCallRequest {
                    id: "c2".into(),
                    name: "unknown_tool".into(),
                    arguments: serde_json::json!({"x": 1}),
                }],
                usage: None,
            },
        ]));
        let executor = make_executor(llm);
        let mut req = base_request("hi");
        req.max_steps_override = Some(1);
        let outcome = executor.execute(req).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Paused);
        assert_eq!(outcome.summary["reason"], "step_limit_reached");
    }
}
