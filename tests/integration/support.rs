//! Shared test fakes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use inference_orchestrator::{ModelRoutes, OrchestratorSettings, PlanOrchestrator};
use orchestrator_core::{
    CoreResult, InMemoryConversationStore, MessageRole, SinkMessage, SinkMessageKind,
    TransportSink,
};
use orchestrator_llm::{
    ChatRequest, ModelDescriptor, ModelResourceManager, ModelRole, NoDevice, ParameterSchema,
    PlacementPolicy, ScriptedEngine, SpeedClass,
};
use orchestrator_tools::{FunctionTool, ToolRegistry, ToolResult};

/// Sink that keeps every frame it receives.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<SinkMessage>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<SinkMessage> {
        self.sent.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn count(&self, kind: SinkMessageKind) -> usize {
        self.messages().iter().filter(|m| m.kind == kind).count()
    }

    /// Concatenated `chunk` frames.
    pub fn streamed_text(&self) -> String {
        self.messages()
            .iter()
            .filter(|m| m.kind == SinkMessageKind::Chunk)
            .map(|m| m.message.as_str())
            .collect()
    }
}

#[async_trait]
impl TransportSink for RecordingSink {
    async fn send(&self, message: SinkMessage) -> CoreResult<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
        Ok(())
    }
}

pub fn descriptor(name: &str, exclusive_family: bool) -> ModelDescriptor {
    ModelDescriptor {
        name: name.to_string(),
        path: format!("{}.gguf", name.to_lowercase()),
        size_bytes: 2_000_000_000,
        fits_in_gpu: true,
        speed: SpeedClass::Fast,
        role: ModelRole::Instruct,
        exclusive_family,
    }
}

pub fn manager(engine: Arc<ScriptedEngine>, capacity: usize) -> Arc<ModelResourceManager> {
    Arc::new(ModelResourceManager::new(
        engine,
        Arc::new(NoDevice),
        PlacementPolicy::default(),
        capacity,
    ))
}

/// Text of the last message in a request.
pub fn last_content(request: &ChatRequest) -> String {
    request
        .messages
        .last()
        .map(|m| m.content().to_string())
        .unwrap_or_default()
}

pub fn has_tool_message(request: &ChatRequest) -> bool {
    request.messages.iter().any(|m| m.role() == MessageRole::Tool)
}

pub fn is_planner(request: &ChatRequest) -> bool {
    last_content(request).contains("You are a planner")
}

pub fn is_synthesis(request: &ChatRequest) -> bool {
    request
        .messages
        .iter()
        .any(|m| m.content().starts_with("You have already run"))
}

/// `read_file` tool that always returns `content`.
pub fn fixed_read_file(content: &'static str) -> ToolRegistry {
    let mut props = HashMap::new();
    props.insert(
        "path".to_string(),
        ParameterSchema::string(Some("Path of the file to read")),
    );
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FunctionTool::new(
        "read_file",
        "Read the contents of a text file.",
        ParameterSchema::object(None, props, vec!["path".to_string()]),
        move |_args: Value| async move { ToolResult::ok(content) },
    )));
    registry
}

pub fn orchestrator(
    engine: Arc<ScriptedEngine>,
    registry: ToolRegistry,
    settings: OrchestratorSettings,
) -> PlanOrchestrator {
    PlanOrchestrator::new(
        manager(engine, 2),
        Arc::new(registry),
        Arc::new(InMemoryConversationStore::new()),
        ModelRoutes::single(descriptor("QWEN_4B", false)),
        settings,
    )
}

pub fn settings_in(dir: &Path) -> OrchestratorSettings {
    OrchestratorSettings {
        working_directory: dir.to_path_buf(),
        ..OrchestratorSettings::default()
    }
}
