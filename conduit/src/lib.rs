//! # conduit
//!
//! Agent execution engine: durable runs, a project-scoped tool catalog, and a cooperative
//! LLM+tool loop driven by an [`Executor`] that can pause for human input, spawn child
//! agents, and resume a paused run from where it left off. Agents are invoked on demand,
//! on a schedule, or in reaction to external events via the [`TriggerService`].
//!
//! ## Main modules
//!
//! - [`model`]: the durable entity types (`AgentDefinition`, `Agent`, `AgentRun`, ...) and
//!   the engine's global constants (`model::limits`).
//! - [`store`]: the [`RunStore`] trait plus [`InMemoryRunStore`] and [`SqliteRunStore`].
//! - [`tool_source`] / [`tools`]: the `ToolSource`/`Tool` contracts shared by built-in tools
//!   and external MCP proxies.
//! - [`tool_pool`]: per-project cache of callable tool descriptors, whitelist/glob/depth
//!   resolution.
//! - [`step_tracker`], [`repetition_detector`]: the Step Tracker and Repetition Detector.
//! - [`ask_user`]: the `ask_user` tool and its pause-flag/notifier collaborators.
//! - [`coordination`]: `list_available_agents` / `spawn_agents`, the LLM's entry points into
//!   recursive agent execution.
//! - [`llm_client`]: the [`LlmClient`] / [`ModelFactory`] abstraction.
//! - [`executor`]: the [`Executor`] itself — builds, drives, and adjudicates a run's pipeline.
//! - [`trigger`]: the [`TriggerService`] — cron schedules and event subscriptions routed onto
//!   `Executor::execute`.
//! - [`message`]: the in-flight [`Message`] type the pipeline builds up during a step.
//! - [`error`]: [`AgentError`], the crate-wide error type.

pub mod ask_user;
pub mod coordination;
pub mod error;
pub mod executor;
pub mod llm_client;
pub mod message;
pub mod model;
pub mod repetition_detector;
pub mod step_tracker;
pub mod store;
pub mod tool_pool;
pub mod tool_source;
pub mod tools;
pub mod trigger;

pub use ask_user::{AskPauseFlag, AskUserTool, QuestionNotification, UserNotifier, TOOL_ASK_USER};
pub use coordination::{
    AgentCatalog, ListAvailableAgentsTool, RunLauncher, SpawnAgentsTool,
    TOOL_LIST_AVAILABLE_AGENTS, TOOL_SPAWN_AGENTS,
};
pub use error::AgentError;
pub use executor::{ExecuteOutcome, ExecuteRequest, Executor, ExecutorStreamEvent, StreamSink, WorkspaceProvisioner};
pub use llm_client::{LlmClient, LlmResponse, LlmUsage, ModelFactory, MockLlm, StreamChunk, ToolCallDelta, ToolChoiceMode};
pub use message::Message;
pub use model::{AgentDefinition, RunStatus, Visibility};
pub use repetition_detector::{RepetitionAction, RepetitionDetector};
pub use step_tracker::StepTracker;
pub use store::{InMemoryRunStore, RunFilters, RunStore, SqliteRunStore, StoreError as RunStoreError};
pub use tool_pool::{depth_allows, EmptyMcpRegistry, McpRegistry, PooledTool, ToolPool, COORDINATION_TOOL_NAMES};
pub use tool_source::{ToolCallContent, ToolCallContext, ToolSource, ToolSourceError, ToolSpec};
pub use tools::Tool;
pub use trigger::{EventActor, IncomingEvent, ScheduleCallback, Scheduler, TriggerService};

/// When running `cargo test -p conduit`, initializes tracing from `RUST_LOG` so that unit
/// tests across `src/**` can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
