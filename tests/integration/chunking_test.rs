//! Chunking Integration Tests
//!
//! Paragraph-aware splitting and chunked reads through the resource manager:
//! - Chunks reassemble to the input and respect the budget
//! - A chunked read issues one summary request per chunk, in order
//! - Oversized chunk prompts stop the reduction early

use std::sync::Arc;

use orchestrator_core::Message;
use orchestrator_llm::chunker::split_into_chunks;
use orchestrator_llm::{ScriptedEngine, ScriptedReply};

use crate::support::{descriptor, last_content, manager};

const BUDGET: usize = 300;

fn document() -> String {
    (1..=9)
        .map(|i| {
            format!(
                "Paragraph {}: the quarterly report covers staffing, budgets and the launch \
                 schedule for region {}.",
                i, i
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn summarizing_engine() -> Arc<ScriptedEngine> {
    Arc::new(
        ScriptedEngine::new(|_, request| {
            let prompt = last_content(request);
            let part = prompt
                .strip_prefix("You are reading part ")
                .and_then(|rest| rest.split('/').next())
                .unwrap_or("?")
                .to_string();
            ScriptedReply::Text(format!("<think>scanning</think>notes for part {}", part))
        })
        .with_chunk_budget(BUDGET),
    )
}

// ============================================================================
// Splitting
// ============================================================================

#[test]
fn test_chunks_reassemble_and_fit_budget() {
    let doc = document();
    for budget in [40, 97, 150, BUDGET, 1_000] {
        let chunks = split_into_chunks(&doc, budget);
        assert_eq!(chunks.concat(), doc, "chunks at budget {} lost text", budget);
        for chunk in &chunks {
            assert!(
                chunk.len() <= budget,
                "chunk of {} bytes exceeds budget {}",
                chunk.len(),
                budget
            );
        }
    }
}

#[test]
fn test_chunks_end_on_paragraph_breaks_when_possible() {
    let doc = document();
    let chunks = split_into_chunks(&doc, BUDGET);
    assert!(chunks.len() > 1);
    for chunk in &chunks[..chunks.len() - 1] {
        assert!(
            chunk.ends_with("\n\n"),
            "chunk should end after a paragraph break: {:?}",
            chunk
        );
    }
}

// ============================================================================
// Chunked Reads
// ============================================================================

#[tokio::test]
async fn test_chunked_read_summarizes_each_chunk_in_order() {
    let engine = summarizing_engine();
    let manager = manager(engine.clone(), 2);
    let reader = descriptor("READER", false);
    let doc = document();
    let expected_chunks = split_into_chunks(&doc, BUDGET).len();

    assert!(!manager.fits_one_chunk(&reader, &doc).await.unwrap());
    assert!(manager.fits_one_chunk(&reader, "short note").await.unwrap());

    let summary = manager
        .ask_chunked(&reader, &[Message::user(doc.clone())], Some("When is the launch?"))
        .await
        .unwrap();

    let requests = engine.requests();
    assert_eq!(requests.len(), expected_chunks, "one request per chunk");
    for (i, (model, request)) in requests.iter().enumerate() {
        assert_eq!(model, "READER");
        let prompt = last_content(request);
        assert!(prompt.starts_with(&format!("You are reading part {}/{}", i + 1, expected_chunks)));
        assert!(prompt.contains("When is the launch?"));
    }

    let expected: Vec<String> = (1..=expected_chunks)
        .map(|i| format!("[Part {} Summary]\nnotes for part {}", i, i))
        .collect();
    assert_eq!(summary, expected.join("\n\n"));
}

#[tokio::test]
async fn test_goal_defaults_to_last_message() {
    let engine = summarizing_engine();
    let manager = manager(engine.clone(), 2);
    let reader = descriptor("READER", false);

    manager
        .ask_chunked(
            &reader,
            &[Message::user(document()), Message::user("List every region.")],
            None,
        )
        .await
        .unwrap();

    for (_, request) in engine.requests() {
        assert!(last_content(&request).contains("The user's goal is:\nList every region."));
    }
}

#[tokio::test]
async fn test_oversized_prompt_stops_reduction() {
    let engine = summarizing_engine();
    let manager = manager(engine.clone(), 2);
    let reader = descriptor("READER", false);
    let goal = "g".repeat(BUDGET * 2);

    let summary = manager
        .ask_chunked(&reader, &[Message::user(document())], Some(&goal))
        .await
        .unwrap();

    assert!(summary.is_empty(), "nothing should be summarized");
    assert!(engine.requests().is_empty());
}
