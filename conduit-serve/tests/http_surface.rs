//! End-to-end tests against the real HTTP surface: build isolated, tempfile-backed state,
//! bind a listener on an ephemeral port, serve it, drive it with `reqwest`.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;

async fn spawn_server() -> (String, reqwest::Client, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let hooks_path = dir.path().join("hooks.sqlite");
    let state = conduit_serve::build_state(None, None, &hooks_path, None);
    let router = conduit_serve::router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("http://{}", addr), reqwest::Client::new(), dir)
}

#[tokio::test]
async fn trigger_run_returns_a_run_id_and_status() {
    let (base, client, _dir) = spawn_server().await;

    let resp = client
        .post(format!("{}/v1/runs", base))
        .json(&json!({"agent_id": "assistant", "message": "hello"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert!(!body["run_id"].as_str().unwrap().is_empty());
    assert!(body["status"].is_string());
}

#[tokio::test]
async fn get_run_roundtrips_a_triggered_run() {
    let (base, client, _dir) = spawn_server().await;

    let triggered: Value = client
        .post(format!("{}/v1/runs", base))
        .json(&json!({"agent_id": "assistant", "message": "hello"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let run_id = triggered["run_id"].as_str().unwrap();

    let resp = client.get(format!("{}/v1/runs/{}", base, run_id)).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["run_id"], run_id);
}

#[tokio::test]
async fn get_run_404s_for_unknown_run() {
    let (base, client, _dir) = spawn_server().await;

    let resp = client.get(format!("{}/v1/runs/no-such-run", base)).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_rejects_missing_bearer_token() {
    let (base, client, _dir) = spawn_server().await;

    let resp = client
        .post(format!("{}/v1/webhooks/no-such-hook", base))
        .json(&json!({"prompt": "hi"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_rejects_unknown_hook_even_with_a_token() {
    let (base, client, _dir) = spawn_server().await;

    let resp = client
        .post(format!("{}/v1/webhooks/no-such-hook", base))
        .bearer_auth("whatever")
        .json(&json!({"prompt": "hi"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
}

async fn spawn_server_with_hook(hook_id: &str, agent_id: &str, token: &str) -> (String, reqwest::Client, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let hooks_path = dir.path().join("hooks.sqlite");
    let hook_store = conduit_serve::WebhookHookStore::new(&hooks_path).unwrap();
    hook_store.register(hook_id, agent_id, "default", token).await.unwrap();

    let state = conduit_serve::build_state(None, None, &hooks_path, None);
    let router = conduit_serve::router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("http://{}", addr), reqwest::Client::new(), dir)
}

#[tokio::test]
async fn webhook_with_registered_hook_and_token_triggers_a_run() {
    let (base, client, _dir) = spawn_server_with_hook("hook-1", "assistant", "s3cr3t").await;

    let resp = client
        .post(format!("{}/v1/webhooks/hook-1", base))
        .bearer_auth("s3cr3t")
        .json(&json!({"prompt": "triggered from a webhook"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert!(!body["run_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn webhook_rejects_the_wrong_token_for_a_registered_hook() {
    let (base, client, _dir) = spawn_server_with_hook("hook-2", "assistant", "s3cr3t").await;

    let resp = client
        .post(format!("{}/v1/webhooks/hook-2", base))
        .bearer_auth("wrong")
        .json(&json!({"prompt": "hi"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_rate_limits_a_burst_of_requests() {
    let (base, client, _dir) = spawn_server_with_hook("hook-3", "assistant", "s3cr3t").await;

    let mut saw_rate_limited = false;
    for _ in 0..15 {
        let resp = client
            .post(format!("{}/v1/webhooks/hook-3", base))
            .bearer_auth("s3cr3t")
            .json(&json!({"prompt": "hi"}))
            .send()
            .await
            .unwrap();
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            saw_rate_limited = true;
            break;
        }
    }

    assert!(saw_rate_limited, "expected a burst of 15 requests to trip the rate limiter");
}
