//! HTTP surface for conduit: a run-trigger endpoint, a webhook receiver with authentication
//! and rate limiting, a question-answer endpoint, and run-status lookups. Built on `axum`.

mod app;
mod handlers;
mod hooks;
mod rate_limit;
mod support;

use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use conduit::{AgentCatalog, EmptyMcpRegistry, Executor, InMemoryRunStore, RunStore, SqliteRunStore, ToolPool};
use conduit_workspace::SqliteWorkspaceProvisioner;

use hooks::HookStore;
use rate_limit::WebhookRateLimiters;
use support::{EchoModelFactory, LoggingNotifier, NoToolSource};

pub use app::{router, AppState};
pub use hooks::{HookBinding, HookStore as WebhookHookStore};

const DEFAULT_ADDR: &str = "127.0.0.1:8088";

/// Builds the shared state. `run_db`/`workspace_db` default to in-memory/disabled when
/// `None` (used by the process-entrypoint builders below via env vars, and directly by
/// tests wanting isolated temp paths).
pub fn build_state(
    catalog: Option<Arc<dyn AgentCatalog>>,
    run_db: Option<&Path>,
    hooks_db: &Path,
    workspace_db: Option<&Path>,
) -> Arc<AppState> {
    let store: Arc<dyn RunStore> = match run_db {
        Some(path) => match SqliteRunStore::new(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!(error = %e, "failed to open run store, falling back to in-memory");
                Arc::new(InMemoryRunStore::new())
            }
        },
        None => Arc::new(InMemoryRunStore::new()),
    };
    let workspace = workspace_db.and_then(|path| {
        SqliteWorkspaceProvisioner::new(path)
            .ok()
            .map(|p| Arc::new(p) as Arc<dyn conduit::WorkspaceProvisioner>)
    });
    let tool_pool = Arc::new(ToolPool::new(Arc::new(NoToolSource), Arc::new(EmptyMcpRegistry)));
    let executor = Executor::new(
        store.clone(),
        tool_pool,
        Arc::new(EchoModelFactory),
        workspace,
        Arc::new(LoggingNotifier),
        catalog.clone(),
    );
    let hooks = Arc::new(HookStore::new(hooks_db).expect("open webhook hook store"));

    Arc::new(AppState {
        executor,
        store,
        catalog,
        hooks,
        limiters: Arc::new(WebhookRateLimiters::new()),
    })
}

fn build_state_from_env(catalog: Option<Arc<dyn AgentCatalog>>) -> Arc<AppState> {
    let run_db = std::env::var("CONDUIT_RUN_DB").ok();
    let hooks_db = std::env::var("CONDUIT_HOOKS_DB").unwrap_or_else(|_| "conduit-hooks.sqlite".to_string());
    let workspace_db = std::env::var("CONDUIT_WORKSPACE_DB").ok();
    build_state(
        catalog,
        run_db.as_deref().map(Path::new),
        Path::new(&hooks_db),
        workspace_db.as_deref().map(Path::new),
    )
}

/// Runs the HTTP server on an existing listener. Used by tests (bind to `127.0.0.1:0`, then
/// pass the listener in).
pub async fn run_serve_on_listener(
    listener: TcpListener,
    catalog: Option<Arc<dyn AgentCatalog>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("conduit-serve listening on http://{}", addr);
    let state = build_state_from_env(catalog);
    let app = router(state);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Runs the HTTP server. Listens on `addr` (default `127.0.0.1:8088`).
pub async fn run_serve(
    addr: Option<&str>,
    catalog: Option<Arc<dyn AgentCatalog>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = addr.unwrap_or(DEFAULT_ADDR);
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, catalog).await
}
