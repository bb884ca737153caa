//! Inference Engine Trait
//!
//! One capability interface with two implementations: the embedded engine
//! (in-process binding) and the server engine (supervised HTTP process).
//! An engine loads a descriptor into a [`ModelSession`]; the session is
//! wrapped in a [`LoadedModel`] handle that only the resource manager can
//! construct.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use orchestrator_core::{Message, StreamEvent};

use crate::catalog::ModelDescriptor;
use crate::chunker::ContextChunker;
use crate::device::{DevicePlacement, LoadParameters};
use crate::types::{AskOptions, ChatRequest, LlmError, LlmResponse, LlmResult, StopReason};

/// Engine-specific state of one resident model.
#[async_trait]
pub trait ModelSession: Send + Sync {
    /// Single completion.
    async fn complete(&self, request: &ChatRequest) -> LlmResult<LlmResponse>;

    /// Streaming completion. Text fragments go to `tx` as
    /// [`StreamEvent::TextDelta`]; the accumulated response is returned.
    /// Must stop with [`LlmError::Cancelled`] once `cancel` fires.
    async fn stream(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> LlmResult<LlmResponse>;

    /// Size of `text` in the unit used for chunk budgets (tokens or chars).
    fn count_units(&self, text: &str) -> usize;

    /// Maximum units per chunk for chunked reads.
    fn chunk_budget(&self) -> usize;

    /// Release the resident state. Best effort.
    async fn release(&self) -> LlmResult<()>;
}

/// Trait that both inference backends implement.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Load `descriptor` with the given parameters.
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        params: LoadParameters,
    ) -> LlmResult<Box<dyn ModelSession>>;

    /// Single completion against a resident model.
    async fn ask(
        &self,
        model: &LoadedModel,
        messages: &[Message],
        options: &AskOptions,
    ) -> LlmResult<LlmResponse> {
        model.ask(messages, options).await
    }

    /// Chunked read of oversized input, returning the reduced summary.
    async fn ask_chunked(
        &self,
        model: &LoadedModel,
        messages: &[Message],
        goal: Option<&str>,
    ) -> LlmResult<String> {
        model.ask_chunked(messages, goal).await
    }

    /// Streaming completion against a resident model.
    async fn ask_stream(
        &self,
        model: &LoadedModel,
        messages: &[Message],
        options: &AskOptions,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> LlmResult<LlmResponse> {
        model.ask_stream(messages, options, tx, cancel).await
    }
}

/// A live handle to a resident model.
///
/// Generations on the same handle are serialized.
pub struct LoadedModel {
    descriptor: ModelDescriptor,
    params: LoadParameters,
    session: Box<dyn ModelSession>,
    generation: Mutex<()>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("name", &self.descriptor.name)
            .field("params", &self.params)
            .finish()
    }
}

impl LoadedModel {
    pub(crate) fn new(
        descriptor: ModelDescriptor,
        params: LoadParameters,
        session: Box<dyn ModelSession>,
    ) -> Self {
        Self {
            descriptor,
            params,
            session,
            generation: Mutex::new(()),
        }
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn placement(&self) -> DevicePlacement {
        self.params.placement
    }

    /// Chunk budget in the session's units.
    pub fn chunk_budget(&self) -> usize {
        self.session.chunk_budget()
    }

    /// Size of `text` in the session's units.
    pub fn count_units(&self, text: &str) -> usize {
        self.session.count_units(text)
    }

    /// Single completion. A `length` stop is logged, not treated as failure.
    pub async fn ask(&self, messages: &[Message], options: &AskOptions) -> LlmResult<LlmResponse> {
        let _turn = self.generation.lock().await;
        let request = ChatRequest::new(messages, options);
        let response = self.session.complete(&request).await?;
        if response.stop_reason == StopReason::MaxTokens {
            tracing::warn!(
                "Model '{}' stopped at the token limit; reply may be truncated",
                self.descriptor.name
            );
        }
        Ok(response)
    }

    /// Streaming completion.
    pub async fn ask_stream(
        &self,
        messages: &[Message],
        options: &AskOptions,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> LlmResult<LlmResponse> {
        let _turn = self.generation.lock().await;
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        let request = ChatRequest::new(messages, options);
        self.session.stream(&request, tx, cancel).await
    }

    /// Reduce the non-empty message contents chunk by chunk against `goal`
    /// (the last message when `None`).
    pub async fn ask_chunked(&self, messages: &[Message], goal: Option<&str>) -> LlmResult<String> {
        let _turn = self.generation.lock().await;
        let combined = messages
            .iter()
            .map(|m| m.content())
            .filter(|c| !c.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        let goal = goal
            .map(str::to_string)
            .or_else(|| messages.last().map(|m| m.content().to_string()))
            .unwrap_or_default();

        let chunker = ContextChunker::new(self.session.chunk_budget());
        let chunks = chunker.split_measured(&combined, |t| self.session.count_units(t));
        tracing::info!(
            "Model '{}': chunked read of {} chars in {} chunks",
            self.descriptor.name,
            combined.len(),
            chunks.len()
        );
        chunker.reduce(self.session.as_ref(), &chunks, &goal).await
    }

    /// Whether a generation currently holds this model.
    pub(crate) fn is_busy(&self) -> bool {
        self.generation.try_lock().is_err()
    }

    /// Release the session now if no generation holds it.
    pub(crate) async fn try_release(&self) -> Option<LlmResult<()>> {
        let _turn = self.generation.try_lock().ok()?;
        Some(self.session.release().await)
    }

    /// Release the session once no generation is running on it.
    pub(crate) async fn release(&self) -> LlmResult<()> {
        let _turn = self.generation.lock().await;
        self.session.release().await
    }
}

/// Map an HTTP status and body to a backend error.
pub fn parse_http_error(status: u16, body: &str, backend: &str) -> LlmError {
    match status {
        404 => LlmError::ModelNotFound {
            model: body.to_string(),
        },
        400 => LlmError::InvalidRequest {
            message: body.to_string(),
        },
        503 => LlmError::ProviderUnavailable {
            message: format!("{}: {}", backend, body),
        },
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}
