//! Standalone `conduit-serve` binary: run-trigger and webhook HTTP surface with no agent
//! catalog wired in (single-agent / catalog-less deployments only — `spawn_agents` and
//! `list_available_agents` are unavailable without one).

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    config::load_and_apply("conduit", None::<&std::path::Path>).ok();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = std::env::var("CONDUIT_LISTEN_ADDR").ok();
    conduit_serve::run_serve(addr.as_deref(), None).await
}
