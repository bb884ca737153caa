//! Embedded Engine
//!
//! Runs models in-process through a native binding. The binding itself is
//! abstracted behind [`BindingLoader`] and [`ModelBinding`] so the runtime
//! (llama.cpp bindings or similar) is supplied by the host application.
//! Binding calls block, so they run on the blocking thread pool.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use orchestrator_core::StreamEvent;

use crate::catalog::ModelDescriptor;
use crate::chunker::EMBEDDED_CHUNK_TOKENS;
use crate::device::LoadParameters;
use crate::engine::{InferenceEngine, ModelSession};
use crate::types::{ChatRequest, LlmError, LlmResponse, LlmResult, StopReason};

/// A model initialized inside the process.
pub trait ModelBinding: Send + Sync {
    /// Token count under the model's own tokenizer.
    fn count_tokens(&self, text: &str) -> usize;

    /// Blocking single completion.
    fn complete(&self, request: &ChatRequest) -> LlmResult<LlmResponse>;

    /// Blocking token stream. `on_token` returns `false` to stop early.
    fn stream(
        &self,
        request: &ChatRequest,
        on_token: &mut dyn FnMut(&str) -> bool,
    ) -> LlmResult<StopReason>;

    /// Free the model's memory.
    fn close(&self);
}

/// Loads model files into bindings.
pub trait BindingLoader: Send + Sync {
    /// Blocking load of `descriptor.path` with `params`.
    fn load(
        &self,
        descriptor: &ModelDescriptor,
        params: &LoadParameters,
    ) -> LlmResult<Arc<dyn ModelBinding>>;
}

fn join_error(e: tokio::task::JoinError) -> LlmError {
    LlmError::Other {
        message: format!("blocking inference task failed: {}", e),
    }
}

/// In-process inference engine.
pub struct EmbeddedEngine {
    loader: Arc<dyn BindingLoader>,
}

impl EmbeddedEngine {
    pub fn new(loader: Arc<dyn BindingLoader>) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl InferenceEngine for EmbeddedEngine {
    fn name(&self) -> &'static str {
        "embedded"
    }

    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        params: LoadParameters,
    ) -> LlmResult<Box<dyn ModelSession>> {
        let loader = self.loader.clone();
        let owned = descriptor.clone();
        let binding = tokio::task::spawn_blocking(move || loader.load(&owned, &params))
            .await
            .map_err(join_error)?
            .map_err(|e| match e {
                LlmError::LoadFailed { .. } => e,
                other => LlmError::LoadFailed {
                    model: descriptor.name.clone(),
                    message: other.to_string(),
                },
            })?;

        Ok(Box::new(EmbeddedSession {
            binding,
            model_name: descriptor.name.clone(),
        }))
    }
}

/// A model held by the embedded engine. Units are tokens.
pub struct EmbeddedSession {
    binding: Arc<dyn ModelBinding>,
    model_name: String,
}

#[async_trait]
impl ModelSession for EmbeddedSession {
    async fn complete(&self, request: &ChatRequest) -> LlmResult<LlmResponse> {
        let binding = self.binding.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || binding.complete(&request))
            .await
            .map_err(join_error)?
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> LlmResult<LlmResponse> {
        let binding = self.binding.clone();
        let request = request.clone();
        let token = cancel.clone();

        let (stop_reason, content) = tokio::task::spawn_blocking(move || {
            let mut content = String::new();
            let mut on_token = |fragment: &str| {
                if token.is_cancelled() {
                    return false;
                }
                content.push_str(fragment);
                tx.blocking_send(StreamEvent::text(fragment)).is_ok()
            };
            let stop_reason = binding.stream(&request, &mut on_token)?;
            Ok::<_, LlmError>((stop_reason, content))
        })
        .await
        .map_err(join_error)??;

        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        Ok(LlmResponse {
            content: (!content.is_empty()).then_some(content),
            tool_calls: Vec::new(),
            stop_reason,
            model: self.model_name.clone(),
        })
    }

    fn count_units(&self, text: &str) -> usize {
        self.binding.count_tokens(text)
    }

    fn chunk_budget(&self) -> usize {
        EMBEDDED_CHUNK_TOKENS
    }

    async fn release(&self) -> LlmResult<()> {
        let binding = self.binding.clone();
        tokio::task::spawn_blocking(move || binding.close())
            .await
            .map_err(join_error)?;
        tracing::debug!("EmbeddedSession: closed '{}'", self.model_name);
        Ok(())
    }
}
