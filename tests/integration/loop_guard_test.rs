//! Loop Guard Integration Tests
//!
//! Repetitive final answers through a whole request:
//! - A first loop triggers exactly one retry with the no-repeat instruction
//! - A second loop fails the request with an error frame before `[DONE]`
//! - Varied output streams through untouched

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use inference_orchestrator::{
    CoreError, OrchestratorSettings, ACK_MESSAGE, NO_REPEAT_INSTRUCTION,
};
use orchestrator_core::{ConversationStore, MessageRole, SinkMessageKind};
use orchestrator_llm::{ScriptedEngine, ScriptedReply};
use orchestrator_tools::ToolRegistry;

use crate::support::{is_planner, is_synthesis, last_content, orchestrator, RecordingSink};

const CLEAN_ANSWER: &str = "The capital of France is Paris.";

fn tight_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        loop_window: 1,
        loop_threshold: 5,
        ..OrchestratorSettings::default()
    }
}

fn repetition() -> ScriptedReply {
    ScriptedReply::Fragments(vec!["la ".to_string(); 20])
}

/// Planner answers in prose, the single step answers plainly, and synthesis
/// loops until told not to when `recovers` is set.
fn looping_engine(recovers: bool) -> Arc<ScriptedEngine> {
    Arc::new(ScriptedEngine::new(move |_, request| {
        if is_planner(request) {
            ScriptedReply::Text("I can answer this directly.".to_string())
        } else if is_synthesis(request) {
            if recovers && last_content(request) == NO_REPEAT_INSTRUCTION {
                ScriptedReply::Text(CLEAN_ANSWER.to_string())
            } else {
                repetition()
            }
        } else {
            ScriptedReply::Text("Paris".to_string())
        }
    }))
}

fn synthesis_requests(engine: &ScriptedEngine) -> usize {
    engine
        .requests()
        .iter()
        .filter(|(_, request)| is_synthesis(request))
        .count()
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_loop_then_clean_retry_succeeds() {
    let engine = looping_engine(true);
    let orchestrator = orchestrator(engine.clone(), ToolRegistry::new(), tight_settings());
    let sink = RecordingSink::default();

    let outcome = orchestrator
        .handle_request("s1", "What is the capital of France?", &sink, &CancellationToken::new())
        .await
        .expect("retry should recover the request");

    assert_eq!(outcome.final_text, CLEAN_ANSWER);
    assert_eq!(synthesis_requests(&engine), 2, "exactly one retry");
    assert_eq!(
        sink.streamed_text(),
        format!("la la la la {}", CLEAN_ANSWER),
        "fragments before detection are already delivered"
    );
    assert_eq!(sink.count(SinkMessageKind::Error), 0);
    assert_eq!(sink.count(SinkMessageKind::Final), 1);

    let history = orchestrator.conversations().history("s1").await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.role(), MessageRole::Assistant);
    assert_eq!(last.content(), CLEAN_ANSWER, "only the successful attempt is recorded");
}

// ============================================================================
// Failure
// ============================================================================

#[tokio::test]
async fn test_second_loop_fails_request() {
    let engine = looping_engine(false);
    let orchestrator = orchestrator(engine.clone(), ToolRegistry::new(), tight_settings());
    let sink = RecordingSink::default();

    let err = orchestrator
        .handle_request("s1", "What is the capital of France?", &sink, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::LoopDetected(_)), "got {:?}", err);
    assert_eq!(synthesis_requests(&engine), 2, "no more than one retry");

    let messages = sink.messages();
    assert_eq!(messages[0].kind, SinkMessageKind::Ack);
    assert_eq!(messages[0].message, ACK_MESSAGE);
    let n = messages.len();
    assert_eq!(messages[n - 2].kind, SinkMessageKind::Error);
    assert!(messages[n - 1].is_done(), "[DONE] must be the last frame");
    assert_eq!(sink.count(SinkMessageKind::Final), 1);

    let history = orchestrator.conversations().history("s1").await.unwrap();
    assert!(
        history.iter().all(|m| m.role() != MessageRole::Assistant),
        "a failed request records no answer"
    );
}

// ============================================================================
// No Loop
// ============================================================================

#[tokio::test]
async fn test_varied_answer_streams_without_retry() {
    let engine = Arc::new(ScriptedEngine::new(|_, request| {
        if is_synthesis(request) {
            ScriptedReply::Text("Paris has been the capital of France for centuries.".to_string())
        } else {
            ScriptedReply::Text("Paris".to_string())
        }
    }));
    let orchestrator = orchestrator(engine.clone(), ToolRegistry::new(), tight_settings());
    let sink = RecordingSink::default();

    let outcome = orchestrator
        .handle_request("s1", "What is the capital of France?", &sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(synthesis_requests(&engine), 1);
    assert_eq!(outcome.final_text, sink.streamed_text());
    assert!(sink.messages().last().unwrap().is_done());
}
