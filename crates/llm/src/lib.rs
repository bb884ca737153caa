//! Orchestrator LLM
//!
//! Model lifecycle and inference for the orchestrator:
//! - Model catalog and device placement
//! - `InferenceEngine` with embedded (in-process binding) and server
//!   (supervised llama-server process) implementations
//! - `ModelResourceManager`, the bounded LRU cache of resident models
//! - Context chunking for inputs larger than a model's budget
//!
//! Also includes the chat-completion SSE adapter, the HTTP client factory and
//! a scripted engine for running without model weights.

pub mod catalog;
pub mod chunker;
pub mod device;
pub mod embedded;
pub mod engine;
pub mod http_client;
pub mod manager;
pub mod scripted;
pub mod server;
pub mod sse;
pub mod supervisor;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export main types
pub use catalog::{ModelCatalog, ModelDescriptor, ModelRole, SpeedClass};
pub use chunker::{ContextChunker, EMBEDDED_CHUNK_TOKENS, SERVER_CHUNK_CHARS};
pub use device::{DevicePlacement, DeviceProbe, FixedDevice, LoadParameters, NoDevice, PlacementPolicy};
pub use embedded::{BindingLoader, EmbeddedEngine, ModelBinding};
pub use engine::{parse_http_error, InferenceEngine, LoadedModel, ModelSession};
pub use http_client::build_http_client;
pub use manager::ModelResourceManager;
pub use scripted::{ScriptedEngine, ScriptedReply};
pub use server::{ServerEngine, ServerEngineConfig};
pub use sse::ChatCompletionAdapter;
pub use supervisor::{ProcessSupervisor, SupervisorConfig, SupervisorState};
pub use types::*;
