//! ModelResourceManager: bounded LRU cache of resident models
//!
//! The only component that loads or unloads model resources. Admission
//! (lookup, eviction, load, insert) runs under a single async mutex so
//! concurrent `ready` calls cannot push the cache over capacity. Generation
//! on a resident model only takes that model's own lock.
//!
//! ```text
//! ready(d):
//!   resident?            -> move to MRU, return
//!   d exclusive-family   -> evict everything
//!   sole entry exclusive -> evict it
//!   at capacity          -> evict the least recent idle entry, else the LRU
//!   place layers, load, insert as MRU
//! ```
//!
//! An evicted model that is still generating leaves the cache at once but is
//! released by a background task when its generation ends, so admission never
//! waits on another model's stream.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use orchestrator_core::{Message, StreamEvent};

use crate::catalog::ModelDescriptor;
use crate::device::{DeviceProbe, LoadParameters, PlacementPolicy};
use crate::engine::{InferenceEngine, LoadedModel};
use crate::types::{AskOptions, LlmResponse, LlmResult};

/// Bounded cache of loaded models with LRU eviction.
pub struct ModelResourceManager {
    engine: Arc<dyn InferenceEngine>,
    probe: Arc<dyn DeviceProbe>,
    policy: PlacementPolicy,
    capacity: usize,
    /// Front is least recently used, back is most recently used.
    resident: Mutex<Vec<Arc<LoadedModel>>>,
}

impl std::fmt::Debug for ModelResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelResourceManager")
            .field("engine", &self.engine.name())
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .finish()
    }
}

impl ModelResourceManager {
    /// Create a manager holding at most `capacity` models (minimum 1).
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        probe: Arc<dyn DeviceProbe>,
        policy: PlacementPolicy,
        capacity: usize,
    ) -> Self {
        Self {
            engine,
            probe,
            policy,
            capacity: capacity.max(1),
            resident: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn engine(&self) -> &Arc<dyn InferenceEngine> {
        &self.engine
    }

    /// Names of resident models, least recently used first.
    pub async fn loaded_models(&self) -> Vec<String> {
        self.resident
            .lock()
            .await
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Return a resident handle for `descriptor`, loading it if needed.
    ///
    /// A load failure is returned to the caller; evictions made to admit the
    /// model stay in effect and no entry is inserted.
    pub async fn ready(&self, descriptor: &ModelDescriptor) -> LlmResult<Arc<LoadedModel>> {
        let mut resident = self.resident.lock().await;

        if let Some(pos) = resident.iter().position(|m| m.name() == descriptor.name) {
            let model = resident.remove(pos);
            resident.push(model.clone());
            return Ok(model);
        }

        if descriptor.exclusive_family {
            while let Some(model) = resident.pop() {
                self.evict(model).await;
            }
        } else if resident.len() == 1 && resident[0].descriptor().exclusive_family {
            if let Some(model) = resident.pop() {
                self.evict(model).await;
            }
        }
        while resident.len() >= self.capacity {
            let pos = resident.iter().position(|m| !m.is_busy()).unwrap_or(0);
            let model = resident.remove(pos);
            self.evict(model).await;
        }

        let placement = self.policy.place(descriptor, self.probe.as_ref());
        let params = LoadParameters::for_descriptor(descriptor, placement);
        tracing::info!(
            "ModelResourceManager: loading '{}' via {} ({:?}, batch={}, ctx={})",
            descriptor.name,
            self.engine.name(),
            params.placement,
            params.batch_size,
            params.context_tokens
        );

        let session = self.engine.load(descriptor, params).await.map_err(|e| {
            tracing::error!("ModelResourceManager: failed to load '{}': {}", descriptor.name, e);
            e
        })?;

        let model = Arc::new(LoadedModel::new(descriptor.clone(), params, session));
        resident.push(model.clone());
        Ok(model)
    }

    /// Ready the model and run a single completion.
    pub async fn ask(
        &self,
        descriptor: &ModelDescriptor,
        messages: &[Message],
        options: &AskOptions,
    ) -> LlmResult<LlmResponse> {
        let model = self.ready(descriptor).await?;
        self.engine.ask(&model, messages, options).await
    }

    /// Ready the model and stream a completion into `tx`.
    pub async fn ask_stream(
        &self,
        descriptor: &ModelDescriptor,
        messages: &[Message],
        options: &AskOptions,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> LlmResult<LlmResponse> {
        let model = self.ready(descriptor).await?;
        self.engine
            .ask_stream(&model, messages, options, tx, cancel)
            .await
    }

    /// Ready the model and reduce `messages` chunk by chunk against `goal`.
    pub async fn ask_chunked(
        &self,
        descriptor: &ModelDescriptor,
        messages: &[Message],
        goal: Option<&str>,
    ) -> LlmResult<String> {
        let model = self.ready(descriptor).await?;
        self.engine.ask_chunked(&model, messages, goal).await
    }

    /// Chunk budget of a model, loading it if needed.
    pub async fn chunk_budget(&self, descriptor: &ModelDescriptor) -> LlmResult<usize> {
        let model = self.ready(descriptor).await?;
        Ok(model.chunk_budget())
    }

    /// Whether `text` fits in a single chunk of the model, loading it if needed.
    pub async fn fits_one_chunk(&self, descriptor: &ModelDescriptor, text: &str) -> LlmResult<bool> {
        let model = self.ready(descriptor).await?;
        Ok(model.count_units(text) <= model.chunk_budget())
    }

    /// Unload every resident model.
    pub async fn unload_all(&self) {
        let mut resident = self.resident.lock().await;
        while let Some(model) = resident.pop() {
            self.evict(model).await;
        }
    }

    /// Release a model that has already been removed from the cache.
    /// A busy model is handed to a background task. Failures are logged;
    /// the entry is gone either way.
    async fn evict(&self, model: Arc<LoadedModel>) {
        match model.try_release().await {
            Some(result) => log_release(&model, result),
            None => {
                tracing::info!(
                    "ModelResourceManager: '{}' is generating, releasing it when done",
                    model.name()
                );
                tokio::spawn(async move {
                    let result = model.release().await;
                    log_release(&model, result);
                });
            }
        }
    }
}

fn log_release(model: &LoadedModel, result: LlmResult<()>) {
    match result {
        Ok(()) => tracing::info!("ModelResourceManager: evicted '{}'", model.name()),
        Err(e) => tracing::warn!(
            "ModelResourceManager: release of '{}' failed (entry dropped anyway): {}",
            model.name(),
            e
        ),
    }
}
