//! conduit CLI: operator entry point for ad-hoc `execute`/`resume`/`status` calls against the
//! execution engine, without standing up `conduit-serve`.

mod log_format;
mod logging;
mod model_factory;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use conduit::{
    AgentDefinition, ExecuteRequest, Executor, InMemoryRunStore, QuestionNotification, RunStatus, RunStore,
    SqliteRunStore, ToolCallContent, ToolPool, ToolSource, ToolSourceError, ToolSpec, UserNotifier, Visibility,
};
use conduit_workspace::SqliteWorkspaceProvisioner;
use model_factory::EchoModelFactory;
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(about = "conduit — run or resume an agent from the command line")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// Path to the SQLite run store (default: in-memory, discarded on exit).
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Path to the SQLite workspace ledger. Only used when the agent definition carries a
    /// `workspace_config` (omitted otherwise, same as a project with no sandboxing set up).
    #[arg(long, value_name = "PATH", global = true)]
    workspace_db: Option<PathBuf>,

    /// Print the full run outcome as JSON instead of just the final reply.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a fresh run.
    Execute(ExecuteArgs),
    /// Resume a paused run with a new user message.
    Resume(ResumeArgs),
    /// Print the current status and summary of a run.
    Status(StatusArgs),
}

#[derive(clap::Args, Debug)]
struct ExecuteArgs {
    /// Agent id this run is attributed to (arbitrary operator-chosen id in single-CLI use).
    #[arg(long, value_name = "ID")]
    agent_id: String,
    /// Project id this run belongs to.
    #[arg(long, value_name = "ID", default_value = "default")]
    project_id: String,
    /// User message (or pass as trailing positional args).
    #[arg(long, value_name = "TEXT")]
    message: Option<String>,
    #[arg(trailing_var_arg = true)]
    rest: Vec<String>,
    /// System prompt for an inline agent definition (skipped if omitted — no tool/model caps).
    #[arg(long, value_name = "TEXT")]
    system_prompt: Option<String>,
    /// Cap on steps for this run (default: the engine-wide cap).
    #[arg(long, value_name = "N")]
    max_steps: Option<u32>,
}

#[derive(clap::Args, Debug)]
struct ResumeArgs {
    /// The paused run to resume.
    #[arg(long, value_name = "ID")]
    run_id: String,
    /// User message answering the pending question (or pass as trailing positional args).
    #[arg(long, value_name = "TEXT")]
    message: Option<String>,
    #[arg(trailing_var_arg = true)]
    rest: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct StatusArgs {
    #[arg(long, value_name = "ID")]
    run_id: String,
}

fn collect_message(explicit: Option<String>, rest: Vec<String>) -> Result<String, String> {
    explicit
        .or_else(|| if rest.is_empty() { None } else { Some(rest.join(" ")) })
        .ok_or_else(|| "provide a message via --message or trailing positional args".to_string())
}

/// No built-in tools ship with the CLI: concrete tools are a deployment-specific concern
/// wired in by whoever runs `conduit-serve`. `ask_user` still works since the Executor adds
/// it itself.
struct NoToolSource;

#[async_trait]
impl ToolSource for NoToolSource {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError> {
        Ok(Vec::new())
    }

    async fn call_tool(&self, name: &str, _arguments: Value) -> Result<ToolCallContent, ToolSourceError> {
        Err(ToolSourceError::NotFound(name.to_string()))
    }
}

/// Prints a paused run's question to stderr and hands back a synthetic notification id —
/// there's no external notification sink wired up in the CLI.
struct StderrNotifier;

#[async_trait]
impl UserNotifier for StderrNotifier {
    async fn notify_question(&self, n: QuestionNotification) -> Result<String, String> {
        eprintln!("run {} is waiting for input: {}", n.run_id, n.question);
        if !n.options.is_empty() {
            for opt in &n.options {
                eprintln!("  - {}", opt.label);
            }
        }
        Ok(format!("cli-notification-{}", n.run_id))
    }
}

async fn open_store(db: Option<&PathBuf>) -> Result<Arc<dyn RunStore>, Box<dyn std::error::Error>> {
    match db {
        Some(path) => Ok(Arc::new(SqliteRunStore::new(path)?)),
        None => Ok(Arc::new(InMemoryRunStore::new())),
    }
}

fn build_executor(
    store: Arc<dyn RunStore>,
    workspace_db: Option<&PathBuf>,
) -> Result<Arc<Executor>, Box<dyn std::error::Error>> {
    let tool_pool = Arc::new(ToolPool::new(
        Arc::new(NoToolSource),
        Arc::new(conduit::EmptyMcpRegistry),
    ));
    let workspace = match workspace_db {
        Some(path) => Some(Arc::new(SqliteWorkspaceProvisioner::new(path)?) as Arc<dyn conduit::WorkspaceProvisioner>),
        None => None,
    };
    Ok(Executor::new(
        store,
        tool_pool,
        Arc::new(EchoModelFactory),
        workspace,
        Arc::new(StderrNotifier),
        None,
    ))
}

fn print_outcome(run_id: &str, status: RunStatus, summary: &Value, json: bool) {
    if json {
        let out = serde_json::json!({ "run_id": run_id, "status": status, "summary": summary });
        println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
        return;
    }
    match status {
        RunStatus::Success => {
            let reply = summary.get("final_response").and_then(|v| v.as_str()).unwrap_or("");
            println!("{}", reply);
        }
        RunStatus::Paused => {
            println!("run {} paused awaiting input (resume with `conduit resume --run-id {}`)", run_id, run_id);
        }
        other => {
            println!("run {} finished with status {:?}: {}", run_id, other, summary);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::load_and_apply("conduit", None::<&std::path::Path>).ok();
    logging::init()?;

    let args = Args::parse();
    let store = open_store(args.db.as_ref()).await?;
    let executor = build_executor(store.clone(), args.workspace_db.as_ref())?;

    match args.cmd {
        Command::Execute(ea) => {
            let message = collect_message(ea.message, ea.rest)?;
            let agent_definition = ea.system_prompt.map(|system_prompt| AgentDefinition {
                name: ea.agent_id.clone(),
                project_id: ea.project_id.clone(),
                system_prompt,
                model_name: None,
                temperature: None,
                max_tokens: None,
                tools_whitelist: Vec::new(),
                max_steps: ea.max_steps,
                default_timeout: None,
                visibility: Visibility::Internal,
                flow_type: "react".to_string(),
                workspace_config: None,
                config: Value::Null,
                description: None,
            });
            let req = ExecuteRequest {
                agent_id: ea.agent_id,
                agent_definition,
                project_id: ea.project_id,
                user_message: message,
                parent_run_id: None,
                max_steps_override: ea.max_steps,
                timeout: None,
                depth: 0,
                max_depth: 0,
                trigger_source: "manual".to_string(),
                stream: None,
                parent_cancel: None,
            };
            let outcome = executor.execute(req).await?;
            print_outcome(&outcome.run_id, outcome.status, &outcome.summary, args.json);
        }
        Command::Resume(ra) => {
            let message = collect_message(ra.message, ra.rest)?;
            let prior = store
                .find_run_by_id(&ra.run_id)
                .await?
                .ok_or_else(|| format!("no such run: {}", ra.run_id))?;
            let req = ExecuteRequest {
                agent_id: prior.agent_id.clone(),
                agent_definition: None,
                project_id: prior.project_id.clone(),
                user_message: message,
                parent_run_id: prior.parent_run_id.clone(),
                max_steps_override: None,
                timeout: None,
                depth: 0,
                max_depth: 0,
                trigger_source: "manual".to_string(),
                stream: None,
                parent_cancel: None,
            };
            let outcome = executor.resume(&prior, req).await?;
            print_outcome(&outcome.run_id, outcome.status, &outcome.summary, args.json);
        }
        Command::Status(sa) => {
            let run = store
                .find_run_by_id(&sa.run_id)
                .await?
                .ok_or_else(|| format!("no such run: {}", sa.run_id))?;
            print_outcome(&run.id, run.status, run.summary.as_ref().unwrap_or(&Value::Null), args.json);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::collect_message;

    #[test]
    fn collect_message_prefers_explicit_flag() {
        let got = collect_message(Some("hi".to_string()), vec!["ignored".to_string()]).unwrap();
        assert_eq!(got, "hi");
    }

    #[test]
    fn collect_message_joins_trailing_args() {
        let got = collect_message(None, vec!["hello".to_string(), "world".to_string()]).unwrap();
        assert_eq!(got, "hello world");
    }

    #[test]
    fn collect_message_errors_when_empty() {
        assert!(collect_message(None, vec![]).is_err());
    }
}
