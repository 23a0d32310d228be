//! The pipeline loop: one iteration per LLM step, with before-model / before-tool /
//! after-tool callbacks folded inline rather than as a separate event-stream adapter — this
//! engine drives its own LLM client directly instead of proxying an external runtime.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::ask_user::AskPauseFlag;
use crate::error::AgentError;
use crate::llm_client::{LlmClient, ToolChoiceMode};
use crate::message::Message;
use crate::model::{limits, AgentRun, ToolCallStatus};
use crate::repetition_detector::{RepetitionAction, RepetitionDetector};
use crate::step_tracker::StepTracker;
use crate::store::RunStore;
use crate::tool_pool::PooledTool;

use super::{pending_message, pending_tool_call, ExecuteOutcome};
use crate::model::{MessageRole, RunStatus};

/// One increment of run progress, forwarded to a caller-supplied sink.
#[derive(Debug, Clone)]
pub enum ExecutorStreamEvent {
    TextDelta(String),
    ToolCallStart {
        call_id: String,
        name: String,
        arguments: Value,
    },
    ToolCallEnd {
        call_id: String,
        name: String,
        output: Value,
        status: ToolCallStatus,
    },
}

/// Type-erased stream callback; cheap to clone and share across the run's lifetime.
pub type StreamSink = Arc<dyn Fn(ExecutorStreamEvent) + Send + Sync>;

fn emit(stream: Option<&StreamSink>, event: ExecutorStreamEvent) {
    if let Some(sink) = stream {
        sink(event);
    }
}

pub struct DriveArgs<'a> {
    pub store: &'a Arc<dyn RunStore>,
    pub run: &'a AgentRun,
    pub step_tracker: &'a StepTracker,
    pub repetition: &'a RepetitionDetector,
    pub pause_flag: &'a Arc<AskPauseFlag>,
    pub cancel: &'a CancellationToken,
    pub llm: &'a dyn LlmClient,
    pub tools: &'a [PooledTool],
    pub stream: Option<&'a StreamSink>,
    pub workspace_id: &'a Option<String>,
    pub workspace_degraded: bool,
}

/// Drives the LLM+tool loop to completion: success, pause, or terminal failure. All exit
/// paths leave teardown to the caller — this function never provisions or tears down a
/// workspace.
pub async fn drive(args: DriveArgs<'_>, messages: &mut Vec<Message>) -> Result<ExecuteOutcome, AgentError> {
    let DriveArgs {
        store,
        run,
        step_tracker,
        repetition,
        pause_flag,
        cancel,
        llm,
        tools,
        stream,
        workspace_id,
        workspace_degraded,
    } = args;

    let started = Instant::now();
    let tool_specs: Vec<_> = tools.iter().map(|t| t.spec.clone()).collect();
    let mut last_response_text: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            let steps = step_tracker.current();
            let _ = store.fail_run(&run.id, "context cancelled", steps).await;
            return Ok(ExecuteOutcome {
                run_id: run.id.clone(),
                status: RunStatus::Cancelled,
                summary: json!({ "reason": "cancelled", "steps": steps }),
            });
        }

        let step = step_tracker.increment();

        if let Some(question_id) = pause_flag.get() {
            let _ = store.pause_run(&run.id, step).await;
            return Ok(ExecuteOutcome {
                run_id: run.id.clone(),
                status: RunStatus::Paused,
                summary: json!({ "reason": "awaiting_user_input", "question_id": question_id, "steps": step }),
            });
        }

        if step_tracker.exceeded() {
            let _ = store.pause_run(&run.id, step).await;
            return Ok(ExecuteOutcome {
                run_id: run.id.clone(),
                status: RunStatus::Paused,
                summary: json!({ "reason": "step_limit_reached", "steps": step }),
            });
        }

        if step % limits::STEP_PERSIST_CADENCE == 0 {
            let _ = store.update_step_count(&run.id, step).await;
        }

        let response = match llm.invoke(messages, &tool_specs, ToolChoiceMode::Auto).await {
            Ok(r) => r,
            Err(e) => {
                let _ = store.fail_run(&run.id, &e.to_string(), step).await;
                return Ok(ExecuteOutcome {
                    run_id: run.id.clone(),
                    status: RunStatus::Error,
                    summary: json!({ "reason": e.to_string(), "steps": step }),
                });
            }
        };

        if !response.content.is_empty() {
            emit(stream, ExecutorStreamEvent::TextDelta(response.content.clone()));
        }

        if response.tool_calls.is_empty() {
            let assistant_msg = Message::assistant(response.content.clone());
            let _ = store
                .create_message(pending_message(&run.id, MessageRole::Assistant, json!(assistant_msg), step))
                .await;
            messages.push(assistant_msg);
            last_response_text = Some(response.content.clone());
            break;
        }

        let assistant_msg = Message::assistant_with_tool_calls(response.content.clone(), response.tool_calls.clone());
        let _ = store
            .create_message(pending_message(&run.id, MessageRole::Assistant, json!(assistant_msg), step))
            .await;
        messages.push(assistant_msg);

        for call in &response.tool_calls {
            emit(
                stream,
                ExecutorStreamEvent::ToolCallStart {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            );

            let tool_started = Instant::now();
            let mut output = match tools.iter().find(|t| t.name() == call.name) {
                Some(tool) => tool.call(call.arguments.clone(), None).await,
                None => json!({ "error": format!("unknown tool: {}", call.name) }),
            };
            let duration_ms = tool_started.elapsed().as_millis() as u64;

            let mut status = if output.get("error").is_some() {
                ToolCallStatus::Error
            } else {
                ToolCallStatus::Completed
            };

            let action = repetition.record(&call.name, &call.arguments);
            match action {
                RepetitionAction::None => {}
                RepetitionAction::Warn => {
                    if let Value::Object(map) = &mut output {
                        map.insert(
                            "guidance".to_string(),
                            json!("This tool has been called repeatedly with the same arguments; try a different approach."),
                        );
                    }
                }
                RepetitionAction::Stop => {
                    output = json!({ "error": "repeated tool call detected; terminating run" });
                    status = ToolCallStatus::Error;
                }
            }

            let _ = store
                .create_tool_call(pending_tool_call(
                    &run.id,
                    None,
                    &call.name,
                    call.arguments.clone(),
                    output.clone(),
                    status,
                    duration_ms,
                    step,
                ))
                .await;

            emit(
                stream,
                ExecutorStreamEvent::ToolCallEnd {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    output: output.clone(),
                    status,
                },
            );

            let tool_result_msg = Message::tool_result(call.id.clone(), output.clone());
            let _ = store
                .create_message(pending_message(&run.id, MessageRole::ToolResult, json!(tool_result_msg), step))
                .await;
            messages.push(tool_result_msg);

            if action == RepetitionAction::Stop {
                let _ = store.fail_run(&run.id, "repeated tool call detected", step).await;
                return Ok(ExecuteOutcome {
                    run_id: run.id.clone(),
                    status: RunStatus::Error,
                    summary: json!({ "reason": "repetition_stop", "steps": step }),
                });
            }
        }
    }

    let steps = step_tracker.current();
    let duration_ms = started.elapsed().as_millis() as u64;
    let summary = json!({
        "steps": steps,
        "final_response": last_response_text,
        "workspace_id": workspace_id,
        "workspace_degraded": workspace_degraded,
    });
    let _ = store
        .complete_run(&run.id, summary.clone(), steps, duration_ms)
        .await;

    Ok(ExecuteOutcome {
        run_id: run.id.clone(),
        status: RunStatus::Success,
        summary,
    })
}
