//! Orchestrator Integration Tests
//!
//! Whole requests against a scripted engine:
//! - Plan, tool step, follow-up step and streamed synthesis
//! - Failed steps are recorded and the plan continues
//! - Load failures and cancellation end the request with one `[DONE]`
//! - Prose planner replies fall back to `answer_query`
//! - Oversized tool output is reduced by the reader model
//! - The runtime wires the built-in file tools to the working directory

use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use inference_orchestrator::{
    CoreError, OrchestratorConfig, Plan, Runtime, ACK_MESSAGE, ANSWER_QUERY_STEP,
};
use orchestrator_core::{ConversationStore, Message, SinkMessageKind};
use orchestrator_llm::{ChatRequest, LlmError, ModelCatalog, ScriptedEngine, ScriptedReply};
use orchestrator_tools::ToolRegistry;

use crate::support::{
    fixed_read_file, has_tool_message, is_planner, is_synthesis, last_content, orchestrator,
    settings_in, RecordingSink,
};

const QUERY: &str = "What does notes.txt say?";

const TWO_STEP_PLAN: &str = r#"<tool_call>{"name": "plan_steps", "arguments": {"steps": [
    {"step": "read_notes", "prompt": "Read notes.txt", "tool": "read_file"},
    {"step": "answer_query", "prompt": "Answer the user from the notes", "tool": "none"}
]}}</tool_call>"#;

const READ_CALL: &str =
    r#"<tool_call>{"name": "read_file", "arguments": {"path": "notes.txt"}}</tool_call>"#;

/// Tool-step requests carry tool definitions; planner requests are matched first.
fn is_tool_step(request: &ChatRequest) -> bool {
    !request.tools.is_empty()
}

fn reading_engine(answer: &'static str) -> Arc<ScriptedEngine> {
    Arc::new(ScriptedEngine::new(move |_, request| {
        if is_planner(request) {
            ScriptedReply::Text(TWO_STEP_PLAN.to_string())
        } else if is_synthesis(request) {
            ScriptedReply::Text(answer.to_string())
        } else if is_tool_step(request) {
            if has_tool_message(request) {
                ScriptedReply::Text("Done reading.".to_string())
            } else {
                ScriptedReply::Text(READ_CALL.to_string())
            }
        } else {
            ScriptedReply::Text("The notes contain a greeting.".to_string())
        }
    }))
}

fn synthesis_prompts(engine: &ScriptedEngine) -> Vec<String> {
    engine
        .requests()
        .iter()
        .filter(|(_, request)| is_synthesis(request))
        .map(|(_, request)| request.messages[0].content().to_string())
        .collect()
}

// ============================================================================
// End to End
// ============================================================================

#[tokio::test]
async fn test_plan_tool_step_and_synthesis() {
    let dir = TempDir::new().unwrap();
    let engine = reading_engine("The file says Hello world.");
    let orchestrator = orchestrator(
        engine.clone(),
        fixed_read_file("Hello world"),
        settings_in(dir.path()),
    );
    let sink = RecordingSink::default();

    let outcome = orchestrator
        .handle_request("s1", QUERY, &sink, &CancellationToken::new())
        .await
        .unwrap();

    // Plan
    assert_eq!(outcome.plan.len(), 2);
    assert_eq!(outcome.plan.steps[0].name, "read_notes");
    assert_eq!(outcome.plan.steps[0].tool.as_deref(), Some("read_file"));
    assert_eq!(outcome.plan.steps[1].tool, None);

    // Steps
    assert!(outcome.step_results.iter().all(|r| r.ok));
    assert_eq!(
        outcome.step_results[0].result,
        "[Tool read_file result]\nHello world"
    );
    assert_eq!(outcome.step_results[1].result, "The notes contain a greeting.");

    // Synthesis sees the tool output
    let prompts = synthesis_prompts(&engine);
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Hello world"), "synthesis prompt: {}", prompts[0]);
    assert!(prompts[0].ends_with(QUERY));
    assert!(prompts[0].contains("CONTEXT step_1_read_notes:"));

    // Frames
    assert_eq!(outcome.final_text, "The file says Hello world.");
    assert_eq!(sink.streamed_text(), outcome.final_text);
    let messages = sink.messages();
    assert_eq!(messages[0].kind, SinkMessageKind::Ack);
    assert_eq!(messages[0].message, ACK_MESSAGE);
    assert!(messages.last().unwrap().is_done());
    assert_eq!(sink.count(SinkMessageKind::Final), 1);
    assert_eq!(sink.count(SinkMessageKind::Error), 0);
}

#[tokio::test]
async fn test_later_step_sees_earlier_results() {
    let dir = TempDir::new().unwrap();
    let engine = reading_engine("ok");
    let orchestrator = orchestrator(
        engine.clone(),
        fixed_read_file("Hello world"),
        settings_in(dir.path()),
    );

    orchestrator
        .handle_request("s1", QUERY, &RecordingSink::default(), &CancellationToken::new())
        .await
        .unwrap();

    let plain_step = engine
        .requests()
        .into_iter()
        .map(|(_, request)| request)
        .find(|r| !is_planner(r) && !is_synthesis(r) && !is_tool_step(r))
        .expect("the answer step should reach the model");
    let prompt = last_content(&plain_step);
    assert!(prompt.starts_with("Answer the user from the notes"));
    assert!(prompt.contains("STEP: read_notes (ok)\n[Tool read_file result]\nHello world"));
}

#[tokio::test]
async fn test_followup_request_shows_planner_the_previous_answer() {
    let dir = TempDir::new().unwrap();
    let engine = reading_engine("The file says Hello world.");
    let orchestrator = orchestrator(
        engine.clone(),
        fixed_read_file("Hello world"),
        settings_in(dir.path()),
    );

    for query in [QUERY, "And what else?"] {
        orchestrator
            .handle_request("s1", query, &RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap();
    }

    let planner_prompts: Vec<String> = engine
        .requests()
        .iter()
        .filter(|(_, r)| is_planner(r))
        .map(|(_, r)| last_content(r))
        .collect();
    assert_eq!(planner_prompts.len(), 2);
    assert!(planner_prompts[0].contains("(none)"));
    assert!(planner_prompts[1].contains("previous_answer_1: The file says Hello world."));

    let history = orchestrator.conversations().history("s1").await.unwrap();
    assert_eq!(history.len(), 4, "two queries and two answers");
}

// ============================================================================
// Step Failures
// ============================================================================

#[tokio::test]
async fn test_failed_step_is_recorded_and_plan_continues() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::new(|_, request| {
        if is_planner(request) {
            ScriptedReply::Text(
                r#"{"steps": [
                    {"step": "flaky", "prompt": "Do the flaky thing"},
                    {"step": "answer_query", "prompt": "Answer anyway"}
                ]}"#
                .to_string(),
            )
        } else if is_synthesis(request) {
            ScriptedReply::Text("Partial answer.".to_string())
        } else if last_content(request).starts_with("Do the flaky thing") {
            ScriptedReply::Fail(LlmError::ServerError {
                message: "slot unavailable".to_string(),
                status: Some(503),
            })
        } else {
            ScriptedReply::Text("Answered.".to_string())
        }
    }));
    let orchestrator = orchestrator(engine.clone(), ToolRegistry::new(), settings_in(dir.path()));
    let sink = RecordingSink::default();

    let outcome = orchestrator
        .handle_request("s1", QUERY, &sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.step_results.len(), 2);
    assert!(!outcome.step_results[0].ok);
    assert!(outcome.step_results[0].result.contains("slot unavailable"));
    assert!(outcome.step_results[1].ok);
    assert_eq!(outcome.final_text, "Partial answer.");

    let prompts = synthesis_prompts(&engine);
    assert!(prompts[0].contains("STEP: flaky\n"), "failed steps still reach synthesis");
    assert!(!prompts[0].contains("CONTEXT step_1_flaky"), "failed steps add no context entry");
}

#[tokio::test]
async fn test_planner_load_failure_ends_request() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(
        ScriptedEngine::new(|_, _| ScriptedReply::Text("unused".to_string()))
            .fail_loading("QWEN_4B"),
    );
    let orchestrator = orchestrator(engine.clone(), ToolRegistry::new(), settings_in(dir.path()));
    let sink = RecordingSink::default();

    let err = orchestrator
        .handle_request("s1", QUERY, &sink, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Load(_)), "got {:?}", err);
    let kinds: Vec<SinkMessageKind> = sink.messages().iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![SinkMessageKind::Ack, SinkMessageKind::Error, SinkMessageKind::Final]
    );
    assert!(engine.requests().is_empty());
}

#[tokio::test]
async fn test_cancelled_request_sends_done_once() {
    let dir = TempDir::new().unwrap();
    let engine = reading_engine("never streamed");
    let orchestrator = orchestrator(
        engine.clone(),
        fixed_read_file("Hello world"),
        settings_in(dir.path()),
    );
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orchestrator
        .handle_request("s1", QUERY, &sink, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Cancelled(_)), "got {:?}", err);
    assert_eq!(sink.count(SinkMessageKind::Final), 1);
    assert_eq!(sink.count(SinkMessageKind::Chunk), 0);
    assert!(sink.messages().last().unwrap().is_done());
    assert!(synthesis_prompts(&engine).is_empty());
}

// ============================================================================
// Planner Fallback
// ============================================================================

#[tokio::test]
async fn test_prose_planner_reply_falls_back_to_answer_query() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::new(|_, request| {
        if is_planner(request) {
            ScriptedReply::Text("Sure! I would just answer the question.".to_string())
        } else if is_synthesis(request) {
            ScriptedReply::Text("Four.".to_string())
        } else {
            ScriptedReply::Text("2 + 2 = 4".to_string())
        }
    }));
    let orchestrator = orchestrator(engine, ToolRegistry::new(), settings_in(dir.path()));

    let outcome = orchestrator
        .handle_request("s1", "What is 2 + 2?", &RecordingSink::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.plan, Plan::fallback("What is 2 + 2?"));
    assert_eq!(outcome.plan.steps[0].name, ANSWER_QUERY_STEP);
    assert_eq!(outcome.step_results[0].result, "2 + 2 = 4");
    assert_eq!(outcome.final_text, "Four.");
}

// ============================================================================
// Oversized Tool Output
// ============================================================================

#[tokio::test]
async fn test_large_tool_output_is_reduced_by_reader() {
    let dir = TempDir::new().unwrap();
    let content: &'static str = Box::leak(
        (1..=12)
            .map(|i| format!("Section {}: inventory counts for warehouse {} are stable.", i, i))
            .collect::<Vec<_>>()
            .join("\n\n")
            .into_boxed_str(),
    );
    let engine = Arc::new(
        ScriptedEngine::new(|_, request| {
            let last = last_content(request);
            if is_planner(request) {
                ScriptedReply::Text(TWO_STEP_PLAN.to_string())
            } else if last.starts_with("You are reading part") {
                ScriptedReply::Text("warehouses are stable".to_string())
            } else if is_synthesis(request) {
                ScriptedReply::Text("All warehouses are stable.".to_string())
            } else if is_tool_step(request) && !has_tool_message(request) {
                ScriptedReply::Text(READ_CALL.to_string())
            } else {
                ScriptedReply::Text("Done.".to_string())
            }
        })
        .with_chunk_budget(300),
    );
    let orchestrator = orchestrator(engine.clone(), fixed_read_file(content), settings_in(dir.path()));

    let outcome = orchestrator
        .handle_request("s1", QUERY, &RecordingSink::default(), &CancellationToken::new())
        .await
        .unwrap();

    let read = &outcome.step_results[0].result;
    assert!(read.starts_with("[Tool read_file result]\n[Part 1 Summary]\nwarehouses are stable"));
    assert!(!read.contains("Section 1:"), "raw output should not be folded in");

    let chunk_requests = engine
        .requests()
        .iter()
        .filter(|(_, r)| last_content(r).starts_with("You are reading part"))
        .count();
    assert!(chunk_requests > 1);
}

// ============================================================================
// Runtime
// ============================================================================

#[tokio::test]
async fn test_runtime_reads_files_from_working_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "Hello from disk").unwrap();

    let catalog = ModelCatalog::from_json_str(
        r#"{"Models": [
            {"name": "QWEN_4B", "path": "qwen.gguf", "size": 100, "fits_in_gpu": true,
             "inference_speed": "FAST", "role": "INSTRUCT"}
        ]}"#,
    )
    .unwrap();
    let config = OrchestratorConfig {
        working_directory: Some(dir.path().to_path_buf()),
        ..OrchestratorConfig::default()
    };
    let engine = reading_engine("Done.");
    let runtime = Runtime::with_engine(config, catalog, engine.clone()).unwrap();
    let session = Runtime::new_session_id();

    let outcome = runtime
        .handle_request(&session, QUERY, &RecordingSink::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.step_results[0].result,
        "[Tool read_file result]\nHello from disk"
    );
    assert!(synthesis_prompts(&engine)[0].contains("Hello from disk"));

    let history = runtime.conversations().history(&session).await.unwrap();
    assert_eq!(history[0], Message::user(QUERY));

    runtime.shutdown().await;
    assert!(runtime.manager().loaded_models().await.is_empty());
}
