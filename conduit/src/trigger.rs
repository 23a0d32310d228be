//! Trigger Service: multiplexes cron schedules and wildcard-aware event subscriptions onto
//! agent executions, with loop prevention so agent-produced effects never re-enter the
//! reaction path.
//!
//! Two registrations live per project: scheduler bindings (one named task per
//! `trigger_type=schedule` agent) and event listeners (a map from `"<object_type>:<event_type>"`
//! to subscribed agents, with `"*:<event_type>"` standing in for an agent with no
//! `object_types` configured). Both are driven off the same [`AgentCatalog`] the
//! Coordination Tools use, so a project's agent roster has a single source of truth.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::json;
use tokio::sync::RwLock;

use crate::coordination::{AgentCatalog, RunLauncher};
use crate::executor::ExecuteRequest;
use crate::model::{Agent, AgentProcessingLog, ProcessingLogStatus, TriggerType};
use crate::store::RunStore;

/// External collaborator: the cron scheduler primitive. Opaque beyond this surface — the
/// engine does not implement the cron evaluator itself.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn register(&self, task_name: &str, cron_expression: &str, callback: ScheduleCallback) -> Result<(), String>;
    async fn unregister(&self, task_name: &str) -> Result<(), String>;
}

/// Fired by the scheduler when a task's cron expression matches. Boxed and cloneable so the
/// same registration can be handed to a scheduler implementation that stores it by value.
pub type ScheduleCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Who produced an [`IncomingEvent`]. `actor_type == "agent"` is the loop-prevention signal:
/// the engine never re-enters the reaction path for its own output.
#[derive(Debug, Clone)]
pub struct EventActor {
    pub id: String,
    pub actor_type: String,
}

/// One event arriving from the external event bus. `object_type` overrides `entity_type`
/// for event-key formation when present (the bus's own vocabulary doesn't always match the
/// reaction config's `object_types`).
#[derive(Debug, Clone)]
pub struct IncomingEvent {
    pub entity_type: String,
    pub event_type: String,
    pub project_id: String,
    pub object_id: String,
    /// Caller-supplied revision/version marker for the processing-log dedup key; the engine
    /// does not interpret its format.
    pub object_version: String,
    pub data: Option<serde_json::Value>,
    pub actor: Option<EventActor>,
    pub object_type: Option<String>,
}

impl IncomingEvent {
    fn key_object_type(&self) -> &str {
        self.object_type.as_deref().unwrap_or(&self.entity_type)
    }
}

fn scheduler_task_name(agent_id: &str) -> String {
    format!("agent:{}", agent_id)
}

/// Event keys an agent's reaction config subscribes to. Empty `object_types` means wildcard
/// (`"*:<event_type>"`); otherwise the cartesian product of configured object types and
/// event types.
fn event_keys(agent: &Agent) -> Vec<String> {
    let Some(reaction) = &agent.reaction_config else {
        return Vec::new();
    };
    let mut keys = Vec::new();
    if reaction.object_types.is_empty() {
        for event_type in &reaction.events {
            keys.push(format!("*:{}", event_type));
        }
    } else {
        for object_type in &reaction.object_types {
            for event_type in &reaction.events {
                keys.push(format!("{}:{}", object_type, event_type));
            }
        }
    }
    keys
}

/// Multiplexes cron schedules and event subscriptions onto agent executions.
pub struct TriggerService {
    catalog: Arc<dyn AgentCatalog>,
    launcher: Arc<dyn RunLauncher>,
    store: Arc<dyn RunStore>,
    scheduler: Arc<dyn Scheduler>,
    listeners: RwLock<HashMap<String, Vec<Agent>>>,
}

impl TriggerService {
    pub fn new(
        catalog: Arc<dyn AgentCatalog>,
        launcher: Arc<dyn RunLauncher>,
        store: Arc<dyn RunStore>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            launcher,
            store,
            scheduler,
            listeners: RwLock::new(HashMap::new()),
        })
    }

    /// Loads every enabled agent of each trigger type from the catalog and (re)registers its
    /// bindings. Individual registration failures are logged and skipped so one bad agent
    /// doesn't block the rest of the roster from coming up.
    pub async fn sync_on_startup(self: &Arc<Self>) {
        match self.catalog.list_enabled_agents_by_trigger_type(TriggerType::Schedule).await {
            Ok(agents) => {
                for agent in agents {
                    if let Err(e) = self.register_schedule(&agent).await {
                        tracing::warn!(agent_id = %agent.id, error = %e, "schedule registration failed at startup");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to list schedule agents at startup"),
        }

        match self.catalog.list_enabled_agents_by_trigger_type(TriggerType::Reaction).await {
            Ok(agents) => {
                for agent in agents {
                    if let Err(e) = self.register_reaction(&agent).await {
                        tracing::warn!(agent_id = %agent.id, error = %e, "reaction registration failed at startup");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to list reaction agents at startup"),
        }
    }

    /// Registers (or re-registers) whichever binding matches the agent's current
    /// `trigger_type`. Removes any prior binding first so a trigger-type change doesn't leave
    /// a stale scheduler task or event listener entry behind.
    pub async fn sync_agent_trigger(self: &Arc<Self>, agent: &Agent) -> Result<(), String> {
        self.remove_agent_trigger(&agent.id).await?;
        if !agent.enabled {
            return Ok(());
        }
        match agent.trigger_type {
            TriggerType::Schedule => self.register_schedule(agent).await,
            TriggerType::Reaction => self.register_reaction(agent).await,
            TriggerType::Manual => Ok(()),
        }
    }

    /// Unregisters the scheduler task (if any) and strips the agent out of every event
    /// listener entry. Safe to call for an agent with no current bindings.
    pub async fn remove_agent_trigger(&self, agent_id: &str) -> Result<(), String> {
        self.scheduler.unregister(&scheduler_task_name(agent_id)).await?;

        let mut listeners = self.listeners.write().await;
        listeners.retain(|_, agents| {
            agents.retain(|a| a.id != agent_id);
            !agents.is_empty()
        });
        Ok(())
    }

    async fn register_schedule(self: &Arc<Self>, agent: &Agent) -> Result<(), String> {
        let Some(cron) = agent.cron_expression.as_deref().filter(|c| !c.is_empty()) else {
            return Ok(());
        };
        let weak: Weak<TriggerService> = Arc::downgrade(self);
        let agent_id = agent.id.clone();
        let callback: ScheduleCallback = Arc::new(move || {
            let weak = weak.clone();
            let agent_id = agent_id.clone();
            Box::pin(async move {
                if let Some(service) = weak.upgrade() {
                    service.fire_schedule(&agent_id).await;
                }
            })
        });
        self.scheduler.register(&scheduler_task_name(&agent.id), cron, callback).await
    }

    async fn register_reaction(&self, agent: &Agent) -> Result<(), String> {
        let keys = event_keys(agent);
        if keys.is_empty() {
            return Ok(());
        }
        let mut listeners = self.listeners.write().await;
        for key in keys {
            listeners.entry(key).or_default().push(agent.clone());
        }
        Ok(())
    }

    /// Scheduler fire path: looks up the agent, resolves its definition by name, and invokes
    /// the Executor. Failures are logged, never propagated — a scheduler has no caller to
    /// report back to.
    async fn fire_schedule(&self, agent_id: &str) {
        let agent = match self.catalog.find_agent_by_id(agent_id).await {
            Ok(Some(a)) if a.enabled => a,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(agent_id, error = %e, "schedule fire: agent lookup failed");
                return;
            }
        };
        let definition = match self.catalog.find_definition(&agent.project_id, &agent.name).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(agent_id, error = %e, "schedule fire: definition lookup failed");
                return;
            }
        };
        let user_message = definition
            .as_ref()
            .and_then(|d| d.description.clone())
            .unwrap_or_else(|| format!("Scheduled run for agent {}", agent.name));

        let req = ExecuteRequest {
            agent_id: agent.id.clone(),
            agent_definition: definition,
            project_id: agent.project_id.clone(),
            user_message,
            parent_run_id: None,
            max_steps_override: None,
            timeout: None,
            depth: 0,
            max_depth: 0,
            trigger_source: "schedule".to_string(),
            stream: None,
            parent_cancel: None,
        };
        if let Err(e) = self.launcher.clone().launch(req).await {
            tracing::warn!(agent_id, error = %e, "scheduled execution failed");
        }
    }

    /// Event dispatch. Ignores agent-produced events before any routing (loop prevention),
    /// then unions the exact and wildcard listener entries, dedupes by agent id, filters to
    /// the event's project, and spawns one background execution per matching agent. The
    /// listener-map read lock is held only long enough to copy the matched agents; dispatch
    /// itself runs lock-free.
    pub async fn handle_event(self: &Arc<Self>, event: IncomingEvent) {
        if event.actor.as_ref().map(|a| a.actor_type.as_str()) == Some("agent") {
            tracing::debug!(object_id = %event.object_id, "ignoring agent-produced event");
            return;
        }

        let exact_key = format!("{}:{}", event.key_object_type(), event.event_type);
        let wildcard_key = format!("*:{}", event.event_type);

        let matched = {
            let listeners = self.listeners.read().await;
            let mut seen = HashSet::new();
            let mut agents = Vec::new();
            for key in [exact_key.as_str(), wildcard_key.as_str()] {
                if let Some(list) = listeners.get(key) {
                    for agent in list {
                        if agent.project_id == event.project_id && seen.insert(agent.id.clone()) {
                            agents.push(agent.clone());
                        }
                    }
                }
            }
            agents
        };

        for agent in matched {
            if let Some(actor) = &event.actor {
                let ignore_self = agent
                    .reaction_config
                    .as_ref()
                    .map(|r| r.ignore_self_triggered)
                    .unwrap_or(false);
                if ignore_self && actor.id == agent.id {
                    continue;
                }
            }

            let catalog = self.catalog.clone();
            let store = self.store.clone();
            let launcher = self.launcher.clone();
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = dispatch_reaction(catalog, store, launcher, agent.clone(), event).await {
                    tracing::warn!(agent_id = %agent.id, error = %e, "reaction dispatch failed");
                }
            });
        }
    }
}

/// Runs one reaction agent against one event, honoring the at-most-one-concurrent-in-flight
/// guarantee for `(agent_id, object_id, object_version, event_type)` via the processing log.
async fn dispatch_reaction(
    catalog: Arc<dyn AgentCatalog>,
    store: Arc<dyn RunStore>,
    launcher: Arc<dyn RunLauncher>,
    agent: Agent,
    event: IncomingEvent,
) -> Result<(), String> {
    let existing = store
        .find_pending_or_processing(&agent.id, &event.object_id, &event.object_version, &event.event_type)
        .await
        .map_err(|e| e.to_string())?;
    if existing.is_some() {
        return Ok(());
    }

    let log = store
        .create_processing_log(AgentProcessingLog {
            id: String::new(),
            agent_id: agent.id.clone(),
            object_id: event.object_id.clone(),
            object_version: event.object_version.clone(),
            event_type: event.event_type.clone(),
            status: ProcessingLogStatus::Pending,
            created_at: std::time::SystemTime::now(),
            updated_at: std::time::SystemTime::now(),
        })
        .await
        .map_err(|e| e.to_string())?;

    let definition = catalog
        .find_definition(&agent.project_id, &agent.name)
        .await?;

    let _ = store.mark_processing_log_status(&log.id, ProcessingLogStatus::Processing).await;

    let req = ExecuteRequest {
        agent_id: agent.id.clone(),
        agent_definition: definition,
        project_id: agent.project_id.clone(),
        user_message: json!({
            "event_type": event.event_type,
            "object_type": event.key_object_type(),
            "object_id": event.object_id,
            "data": event.data,
        })
        .to_string(),
        parent_run_id: None,
        max_steps_override: None,
        timeout: None,
        depth: 0,
        max_depth: 0,
        trigger_source: "reaction".to_string(),
        stream: None,
        parent_cancel: None,
    };

    let result = launcher.launch(req).await;
    let status = if result.is_ok() {
        ProcessingLogStatus::Completed
    } else {
        ProcessingLogStatus::Failed
    };
    let _ = store.mark_processing_log_status(&log.id, status).await;
    result.map(|_| ()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecuteOutcome;
    use crate::model::{AgentDefinition, ReactionConfig, RunStatus, Visibility};
    use crate::store::InMemoryRunStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeScheduler {
        registered: AsyncMutex<HashMap<String, ScheduleCallback>>,
    }

    impl FakeScheduler {
        fn new() -> Self {
            Self {
                registered: AsyncMutex::new(HashMap::new()),
            }
        }

        async fn fire(&self, task_name: &str) {
            let cb = self.registered.lock().await.get(task_name).cloned();
            if let Some(cb) = cb {
                cb().await;
            }
        }
    }

    #[async_trait]
    impl Scheduler for FakeScheduler {
        async fn register(&self, task_name: &str, _cron: &str, callback: ScheduleCallback) -> Result<(), String> {
            self.registered.lock().await.insert(task_name.to_string(), callback);
            Ok(())
        }

        async fn unregister(&self, task_name: &str) -> Result<(), String> {
            self.registered.lock().await.remove(task_name);
            Ok(())
        }
    }

    struct FakeCatalog {
        agents: Vec<Agent>,
        definitions: Vec<AgentDefinition>,
    }

    #[async_trait]
    impl AgentCatalog for FakeCatalog {
        async fn list_definitions(&self, project_id: &str) -> Result<Vec<AgentDefinition>, String> {
            Ok(self.definitions.iter().filter(|d| d.project_id == project_id).cloned().collect())
        }

        async fn find_definition(&self, project_id: &str, name: &str) -> Result<Option<AgentDefinition>, String> {
            Ok(self
                .definitions
                .iter()
                .find(|d| d.project_id == project_id && d.name == name)
                .cloned())
        }

        async fn find_agent(&self, project_id: &str, name: &str) -> Result<Option<Agent>, String> {
            Ok(self
                .agents
                .iter()
                .find(|a| a.project_id == project_id && a.name == name)
                .cloned())
        }

        async fn find_agent_by_id(&self, agent_id: &str) -> Result<Option<Agent>, String> {
            Ok(self.agents.iter().find(|a| a.id == agent_id).cloned())
        }

        async fn list_enabled_agents_by_trigger_type(&self, trigger_type: TriggerType) -> Result<Vec<Agent>, String> {
            Ok(self
                .agents
                .iter()
                .filter(|a| a.enabled && a.trigger_type == trigger_type)
                .cloned()
                .collect())
        }
    }

    struct CountingLauncher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RunLauncher for CountingLauncher {
        async fn launch(self: Arc<Self>, req: ExecuteRequest) -> Result<ExecuteOutcome, crate::error::AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExecuteOutcome {
                run_id: format!("run-for-{}", req.agent_id),
                status: RunStatus::Success,
                summary: json!({}),
            })
        }

        async fn launch_resume(
            self: Arc<Self>,
            _prior: &crate::model::AgentRun,
            req: ExecuteRequest,
        ) -> Result<ExecuteOutcome, crate::error::AgentError> {
            self.launch(req).await
        }
    }

    fn reaction_agent(id: &str, project_id: &str, object_types: Vec<String>, ignore_self: bool) -> Agent {
        Agent {
            id: id.to_string(),
            project_id: project_id.to_string(),
            name: format!("agent-{}", id),
            enabled: true,
            trigger_type: TriggerType::Reaction,
            cron_expression: None,
            reaction_config: Some(ReactionConfig {
                object_types,
                events: vec!["updated".to_string()],
                ignore_agent_triggered: true,
                ignore_self_triggered: ignore_self,
                concurrency_strategy: crate::model::ConcurrencyStrategy::Parallel,
            }),
            last_run_at: None,
            last_run_status: None,
        }
    }

    fn definition_for(agent: &Agent) -> AgentDefinition {
        AgentDefinition {
            name: agent.name.clone(),
            project_id: agent.project_id.clone(),
            system_prompt: "you are a bot".to_string(),
            model_name: None,
            temperature: None,
            max_tokens: None,
            tools_whitelist: Vec::new(),
            max_steps: None,
            default_timeout: None,
            visibility: Visibility::Internal,
            flow_type: "reaction".to_string(),
            workspace_config: None,
            config: json!({}),
            description: None,
        }
    }

    fn basic_event(project_id: &str, object_type: &str, actor_type: Option<&str>) -> IncomingEvent {
        IncomingEvent {
            entity_type: object_type.to_string(),
            event_type: "updated".to_string(),
            project_id: project_id.to_string(),
            object_id: "obj-1".to_string(),
            object_version: "v1".to_string(),
            data: None,
            actor: actor_type.map(|t| EventActor {
                id: "actor-1".to_string(),
                actor_type: t.to_string(),
            }),
            object_type: None,
        }
    }

    #[tokio::test]
    async fn startup_sync_registers_schedule_and_reaction_agents() {
        let schedule_agent = Agent {
            id: "sched-1".to_string(),
            project_id: "proj-1".to_string(),
            name: "scheduled".to_string(),
            enabled: true,
            trigger_type: TriggerType::Schedule,
            cron_expression: Some("@hourly".to_string()),
            reaction_config: None,
            last_run_at: None,
            last_run_status: None,
        };
        let reaction = reaction_agent("react-1", "proj-1", vec![], false);
        let catalog = Arc::new(FakeCatalog {
            definitions: vec![definition_for(&schedule_agent), definition_for(&reaction)],
            agents: vec![schedule_agent.clone(), reaction.clone()],
        });
        let launcher = Arc::new(CountingLauncher {
            calls: AtomicUsize::new(0),
        });
        let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
        let scheduler = Arc::new(FakeScheduler::new());
        let service = TriggerService::new(catalog, launcher.clone(), store, scheduler.clone());

        service.sync_on_startup().await;

        scheduler.fire("agent:sched-1").await;
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);

        let matched = service
            .listeners
            .read()
            .await
            .get("*:updated")
            .cloned()
            .unwrap_or_default();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, "react-1");
    }

    #[tokio::test]
    async fn handle_event_ignores_agent_actor() {
        let reaction = reaction_agent("react-1", "proj-1", vec!["document".to_string()], false);
        let catalog = Arc::new(FakeCatalog {
            definitions: vec![definition_for(&reaction)],
            agents: vec![reaction.clone()],
        });
        let launcher = Arc::new(CountingLauncher {
            calls: AtomicUsize::new(0),
        });
        let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
        let scheduler = Arc::new(FakeScheduler::new());
        let service = TriggerService::new(catalog, launcher.clone(), store, scheduler);
        service.register_reaction(&reaction).await.unwrap();

        service
            .handle_event(basic_event("proj-1", "document", Some("agent")))
            .await;
        tokio::task::yield_now().await;
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 0);

        service
            .handle_event(basic_event("proj-1", "document", Some("user")))
            .await;
        // Background dispatch; give the spawned task a turn to run.
        for _ in 0..20 {
            if launcher.calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handle_event_dedups_exact_and_wildcard_matches() {
        let agent = reaction_agent("react-1", "proj-1", vec![], false);
        let catalog = Arc::new(FakeCatalog {
            definitions: vec![definition_for(&agent)],
            agents: vec![agent.clone()],
        });
        let launcher = Arc::new(CountingLauncher {
            calls: AtomicUsize::new(0),
        });
        let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
        let scheduler = Arc::new(FakeScheduler::new());
        let service = TriggerService::new(catalog, launcher.clone(), store, scheduler);

        // Register the same agent under both an exact key and its own wildcard key by
        // inserting directly, simulating overlapping registrations.
        {
            let mut listeners = service.listeners.write().await;
            listeners.entry("document:updated".to_string()).or_default().push(agent.clone());
            listeners.entry("*:updated".to_string()).or_default().push(agent.clone());
        }

        service
            .handle_event(basic_event("proj-1", "document", Some("user")))
            .await;
        for _ in 0..20 {
            if launcher.calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remove_agent_trigger_clears_scheduler_and_listeners() {
        let agent = reaction_agent("react-1", "proj-1", vec!["document".to_string()], false);
        let catalog = Arc::new(FakeCatalog {
            definitions: vec![definition_for(&agent)],
            agents: vec![agent.clone()],
        });
        let launcher = Arc::new(CountingLauncher {
            calls: AtomicUsize::new(0),
        });
        let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
        let scheduler = Arc::new(FakeScheduler::new());
        let service = TriggerService::new(catalog, launcher, store, scheduler);
        service.register_reaction(&agent).await.unwrap();
        assert!(!service.listeners.read().await.is_empty());

        service.remove_agent_trigger(&agent.id).await.unwrap();
        assert!(service.listeners.read().await.is_empty());
    }

    #[tokio::test]
    async fn dispatch_reaction_skips_when_already_in_flight() {
        let agent = reaction_agent("react-1", "proj-1", vec!["document".to_string()], false);
        let catalog: Arc<dyn AgentCatalog> = Arc::new(FakeCatalog {
            definitions: vec![definition_for(&agent)],
            agents: vec![agent.clone()],
        });
        let launcher = Arc::new(CountingLauncher {
            calls: AtomicUsize::new(0),
        });
        let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());

        store
            .create_processing_log(AgentProcessingLog {
                id: String::new(),
                agent_id: agent.id.clone(),
                object_id: "obj-1".to_string(),
                object_version: "v1".to_string(),
                event_type: "updated".to_string(),
                status: ProcessingLogStatus::Processing,
                created_at: std::time::SystemTime::now(),
                updated_at: std::time::SystemTime::now(),
            })
            .await
            .unwrap();

        let event = basic_event("proj-1", "document", Some("user"));
        dispatch_reaction(catalog, store, launcher.clone() as Arc<dyn RunLauncher>, agent, event)
            .await
            .unwrap();

        assert_eq!(launcher.calls.load(Ordering::SeqCst), 0);
    }
}
