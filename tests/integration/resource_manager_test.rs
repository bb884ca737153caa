//! Resource Manager Integration Tests
//!
//! Verifies the bounded model cache:
//! - The resident set never exceeds capacity and keeps the most recent models
//! - Exclusive-family models are always resident alone
//! - Load failures leave the cache usable
//! - Device placement follows the memory budget

use std::sync::Arc;

use orchestrator_core::Message;
use orchestrator_llm::{
    AskOptions, DevicePlacement, FixedDevice, LlmError, ModelResourceManager, PlacementPolicy,
    ScriptedEngine, ScriptedReply,
};

use crate::support::{descriptor, manager};

fn scripted() -> Arc<ScriptedEngine> {
    Arc::new(ScriptedEngine::new(|name, _| {
        ScriptedReply::Text(format!("{} says hi", name))
    }))
}

// ============================================================================
// Cache Bound
// ============================================================================

#[tokio::test]
async fn test_loaded_set_is_last_k_requested() {
    let engine = scripted();
    let manager = manager(engine.clone(), 3);

    let names: Vec<String> = (1..=7).map(|i| format!("M{}", i)).collect();
    for name in &names {
        manager.ready(&descriptor(name, false)).await.unwrap();
        assert!(
            manager.loaded_models().await.len() <= 3,
            "resident set exceeded capacity after loading {}",
            name
        );
    }

    assert_eq!(
        manager.loaded_models().await,
        vec!["M5", "M6", "M7"],
        "resident set should be the last three models requested"
    );
    assert_eq!(engine.release_log(), vec!["M1", "M2", "M3", "M4"]);
}

#[tokio::test]
async fn test_mixed_sequence_never_exceeds_capacity() {
    let manager = manager(scripted(), 2);
    let sequence = ["A", "B", "A", "C", "B", "B", "D", "A", "C"];
    for name in sequence {
        manager.ready(&descriptor(name, false)).await.unwrap();
        assert!(manager.loaded_models().await.len() <= 2);
    }
    assert_eq!(manager.loaded_models().await, vec!["A", "C"]);
}

#[tokio::test]
async fn test_concurrent_requests_respect_capacity() {
    let manager = manager(scripted(), 2);
    let mut handles = Vec::new();
    for i in 0..12 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let d = descriptor(&format!("C{}", i % 5), false);
            manager
                .ask(&d, &[Message::user("hello")], &AskOptions::default())
                .await
                .map(|r| r.content_text().to_string())
        }));
    }
    for handle in handles {
        let reply = handle.await.unwrap().unwrap();
        assert!(reply.ends_with("says hi"), "unexpected reply: {}", reply);
    }
    assert!(manager.loaded_models().await.len() <= 2);
}

// ============================================================================
// Exclusive Family
// ============================================================================

#[tokio::test]
async fn test_exclusive_family_is_resident_alone() {
    let manager = manager(scripted(), 4);
    for name in ["A", "B", "C"] {
        manager.ready(&descriptor(name, false)).await.unwrap();
    }

    manager.ready(&descriptor("JAMBA", true)).await.unwrap();
    assert_eq!(
        manager.loaded_models().await,
        vec!["JAMBA"],
        "exclusive-family model must be the only resident model"
    );

    manager.ready(&descriptor("A", false)).await.unwrap();
    assert_eq!(manager.loaded_models().await, vec!["A"]);
}

#[tokio::test]
async fn test_reusing_exclusive_model_keeps_it_alone() {
    let engine = scripted();
    let manager = manager(engine.clone(), 2);
    let jamba = descriptor("JAMBA", true);
    manager.ready(&jamba).await.unwrap();
    manager.ready(&jamba).await.unwrap();
    assert_eq!(manager.loaded_models().await, vec!["JAMBA"]);
    assert_eq!(engine.load_log(), vec!["JAMBA"], "resident model must not reload");
}

// ============================================================================
// Failures and Placement
// ============================================================================

#[tokio::test]
async fn test_load_failure_is_returned_and_cache_stays_usable() {
    let engine = Arc::new(
        ScriptedEngine::new(|_, _| ScriptedReply::Text("fine".into())).fail_loading("BROKEN"),
    );
    let manager = manager(engine, 2);
    manager.ready(&descriptor("A", false)).await.unwrap();

    let err = manager
        .ask(&descriptor("BROKEN", false), &[Message::user("x")], &AskOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::LoadFailed { .. }));
    assert_eq!(manager.loaded_models().await, vec!["A"]);

    let reply = manager
        .ask(&descriptor("A", false), &[Message::user("x")], &AskOptions::default())
        .await
        .unwrap();
    assert_eq!(reply.content_text(), "fine");
}

#[tokio::test]
async fn test_placement_follows_device_budget() {
    let manager = ModelResourceManager::new(
        scripted(),
        Arc::new(FixedDevice {
            memory_bytes: 4_000_000_000,
        }),
        PlacementPolicy::default(),
        2,
    );

    let small = manager.ready(&descriptor("SMALL", false)).await.unwrap();
    assert_eq!(small.placement(), DevicePlacement::Full);

    let mut large = descriptor("LARGE", false);
    large.size_bytes = 9_000_000_000;
    let large = manager.ready(&large).await.unwrap();
    assert_eq!(large.placement(), DevicePlacement::Layers(25));
}
