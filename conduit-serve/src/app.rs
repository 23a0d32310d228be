//! Axum app: shared state and router.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use conduit::{AgentCatalog, Executor, RunStore};

use crate::hooks::HookStore;
use crate::rate_limit::WebhookRateLimiters;

pub struct AppState {
    pub executor: Arc<Executor>,
    pub store: Arc<dyn RunStore>,
    pub catalog: Option<Arc<dyn AgentCatalog>>,
    pub hooks: Arc<HookStore>,
    pub limiters: Arc<WebhookRateLimiters>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/runs", post(crate::handlers::trigger_run))
        .route("/v1/runs/:run_id", get(crate::handlers::get_run))
        .route("/v1/runs/:run_id/resume", post(crate::handlers::resume_run))
        .route("/v1/questions/:question_id/answer", post(crate::handlers::answer_question))
        .route("/v1/webhooks/:hook_id", post(crate::handlers::receive_webhook))
        .with_state(state)
}
