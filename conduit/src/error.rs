//! Crate-wide error type for the execution engine.

/// Errors produced by the execution engine.
///
/// Variants map to the error kinds in the engine's propagation policy: tool failures are
/// always domain data (never represented here), storage errors are logged and swallowed on
/// non-critical paths by callers, and context errors transition a run to its terminal state.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("depth {depth} exceeds max_depth {max_depth}")]
    DepthExceeded { depth: u32, max_depth: u32 },

    #[error("resume refused: {0}")]
    ResumeRefused(String),

    #[error("step limit already reached")]
    StepLimitReached,

    #[error("context cancelled: {0}")]
    Cancelled(String),

    #[error("context deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("storage: {0}")]
    Storage(#[from] crate::store::StoreError),

    #[error("tool source: {0}")]
    ToolSource(#[from] crate::tool_source::ToolSourceError),

    #[error("model resolution: {0}")]
    ModelResolution(String),

    #[error("workspace provisioning: {0}")]
    WorkspaceProvision(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

impl AgentError {
    /// True for error kinds the engine treats as a context-cancellation terminal transition
    /// rather than a generic execution failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AgentError::Cancelled(_) | AgentError::DeadlineExceeded(_))
    }
}
