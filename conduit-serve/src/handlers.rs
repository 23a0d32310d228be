//! HTTP handlers: run-trigger, resume, question-answer, and the authenticated/rate-limited
//! webhook receiver.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use conduit::{AgentDefinition, ExecuteOutcome, ExecuteRequest, RunStatus, Visibility};

use crate::app::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (status, Json(ErrorBody { error: message.into() }))
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: String,
    pub status: RunStatus,
    pub summary: Value,
}

impl From<ExecuteOutcome> for RunResponse {
    fn from(o: ExecuteOutcome) -> Self {
        Self {
            run_id: o.run_id,
            status: o.status,
            summary: o.summary,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TriggerRunRequest {
    pub agent_id: String,
    #[serde(default = "default_project_id")]
    pub project_id: String,
    pub message: String,
    pub system_prompt: Option<String>,
    pub max_steps: Option<u32>,
}

fn default_project_id() -> String {
    "default".to_string()
}

/// `POST /v1/runs` — the run-trigger endpoint. Always returns a `run_id` for a request that
/// reached the Executor; only a malformed request fails without one.
pub async fn trigger_run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TriggerRunRequest>,
) -> Result<Json<RunResponse>, (StatusCode, Json<ErrorBody>)> {
    let agent_definition = req.system_prompt.map(|system_prompt| AgentDefinition {
        name: req.agent_id.clone(),
        project_id: req.project_id.clone(),
        system_prompt,
        model_name: None,
        temperature: None,
        max_tokens: None,
        tools_whitelist: Vec::new(),
        max_steps: req.max_steps,
        default_timeout: None,
        visibility: Visibility::Internal,
        flow_type: "react".to_string(),
        workspace_config: None,
        config: Value::Null,
        description: None,
    });

    let outcome = state
        .executor
        .execute(ExecuteRequest {
            agent_id: req.agent_id,
            agent_definition,
            project_id: req.project_id,
            user_message: req.message,
            parent_run_id: None,
            max_steps_override: req.max_steps,
            timeout: None,
            depth: 0,
            max_depth: 0,
            trigger_source: "api".to_string(),
            stream: None,
            parent_cancel: None,
        })
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    Ok(Json(outcome.into()))
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunResponse>, (StatusCode, Json<ErrorBody>)> {
    let run = state
        .store
        .find_run_by_id(&run_id)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, format!("no such run: {}", run_id)))?;

    Ok(Json(RunResponse {
        run_id: run.id,
        status: run.status,
        summary: run.summary.unwrap_or(Value::Null),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ResumeRunRequest {
    pub message: String,
}

pub async fn resume_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Json(req): Json<ResumeRunRequest>,
) -> Result<Json<RunResponse>, (StatusCode, Json<ErrorBody>)> {
    let prior = state
        .store
        .find_run_by_id(&run_id)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, format!("no such run: {}", run_id)))?;

    let outcome = state
        .executor
        .resume(
            &prior,
            ExecuteRequest {
                agent_id: prior.agent_id.clone(),
                agent_definition: None,
                project_id: prior.project_id.clone(),
                user_message: req.message,
                parent_run_id: prior.parent_run_id.clone(),
                max_steps_override: None,
                timeout: None,
                depth: 0,
                max_depth: 0,
                trigger_source: "api".to_string(),
                stream: None,
                parent_cancel: None,
            },
        )
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
pub struct AnswerQuestionRequest {
    pub response: String,
    pub responder_id: String,
}

/// `POST /v1/questions/:question_id/answer` — the free-form answer path `ask_user` hands out
/// as `response_url` when a question has no fixed options. Answers the question, then
/// resumes the run it paused.
pub async fn answer_question(
    State(state): State<Arc<AppState>>,
    Path(question_id): Path<String>,
    Json(req): Json<AnswerQuestionRequest>,
) -> Result<Json<RunResponse>, (StatusCode, Json<ErrorBody>)> {
    let question = state
        .store
        .find_question_by_id(&question_id)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, format!("no such question: {}", question_id)))?;

    state
        .store
        .answer_question(&question_id, &req.response, &req.responder_id)
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    let prior = state
        .store
        .find_run_by_id(&question.run_id)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, format!("no such run: {}", question.run_id)))?;

    let outcome = state
        .executor
        .resume(
            &prior,
            ExecuteRequest {
                agent_id: prior.agent_id.clone(),
                agent_definition: None,
                project_id: prior.project_id.clone(),
                user_message: req.response,
                parent_run_id: prior.parent_run_id.clone(),
                max_steps_override: None,
                timeout: None,
                depth: 0,
                max_depth: 0,
                trigger_source: "api".to_string(),
                stream: None,
                parent_cancel: None,
            },
        )
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    pub prompt: Option<String>,
    pub context: Option<Value>,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// `POST /v1/webhooks/:hook_id` — external trigger inputs per the engine's webhook contract:
/// `{prompt?, context?}` body, bearer token hashed at rest and compared constant-time,
/// rate-limited per hook (60 req/min, burst 10).
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(hook_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<WebhookBody>,
) -> Result<Json<RunResponse>, (StatusCode, Json<ErrorBody>)> {
    if !state.limiters.check(&hook_id).await {
        return Err(error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded"));
    }

    let Some(token) = bearer_token(&headers) else {
        return Err(error_response(StatusCode::UNAUTHORIZED, "missing bearer token"));
    };

    let binding = state
        .hooks
        .authenticate(&hook_id, token)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "invalid hook or token"))?;

    let agent_definition = match &state.catalog {
        Some(catalog) => match catalog.find_agent_by_id(&binding.agent_id).await {
            Ok(Some(agent)) => catalog
                .find_definition(&binding.project_id, &agent.name)
                .await
                .unwrap_or(None),
            _ => None,
        },
        None => None,
    };

    let mut user_message = req_message(&body);
    if let Some(context) = &body.context {
        user_message = format!("{}\n\ncontext: {}", user_message, context);
    }

    let outcome = state
        .executor
        .execute(ExecuteRequest {
            agent_id: binding.agent_id,
            agent_definition,
            project_id: binding.project_id,
            user_message,
            parent_run_id: None,
            max_steps_override: None,
            timeout: None,
            depth: 0,
            max_depth: 0,
            trigger_source: "webhook".to_string(),
            stream: None,
            parent_cancel: None,
        })
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    Ok(Json(outcome.into()))
}

fn req_message(body: &WebhookBody) -> String {
    body.prompt.clone().unwrap_or_default()
}
