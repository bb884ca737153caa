//! Scripted Engine
//!
//! Deterministic in-memory engine whose replies come from a caller-supplied
//! responder. Used by tests and for running the orchestrator without model
//! weights. Loads, releases and requests are recorded for inspection.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use orchestrator_core::StreamEvent;

use crate::catalog::ModelDescriptor;
use crate::chunker::SERVER_CHUNK_CHARS;
use crate::device::LoadParameters;
use crate::engine::{InferenceEngine, ModelSession};
use crate::types::{ChatRequest, LlmError, LlmResponse, LlmResult};

/// What a scripted model does for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    /// Reply text; streamed word by word
    Text(String),
    /// Reply streamed as exactly these fragments
    Fragments(Vec<String>),
    /// Fail the request
    Fail(LlmError),
}

/// Responder invoked with the model name and the assembled request.
pub type Responder = Arc<dyn Fn(&str, &ChatRequest) -> ScriptedReply + Send + Sync>;

#[derive(Default)]
struct Journal {
    loads: Vec<String>,
    releases: Vec<String>,
    requests: Vec<(String, ChatRequest)>,
}

/// Engine producing [`ScriptedSession`]s.
pub struct ScriptedEngine {
    responder: Responder,
    chunk_budget: usize,
    failing: HashSet<String>,
    journal: Arc<Mutex<Journal>>,
}

impl ScriptedEngine {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &ChatRequest) -> ScriptedReply + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            chunk_budget: SERVER_CHUNK_CHARS,
            failing: HashSet::new(),
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }

    /// Character budget reported by every session.
    pub fn with_chunk_budget(mut self, chunk_budget: usize) -> Self {
        self.chunk_budget = chunk_budget;
        self
    }

    /// Make loads of `name` fail.
    pub fn fail_loading(mut self, name: impl Into<String>) -> Self {
        self.failing.insert(name.into());
        self
    }

    /// Model names loaded so far, in order.
    pub fn load_log(&self) -> Vec<String> {
        self.journal.lock().map(|j| j.loads.clone()).unwrap_or_default()
    }

    /// Model names released so far, in order.
    pub fn release_log(&self) -> Vec<String> {
        self.journal
            .lock()
            .map(|j| j.releases.clone())
            .unwrap_or_default()
    }

    /// Every request served, tagged with the model name.
    pub fn requests(&self) -> Vec<(String, ChatRequest)> {
        self.journal
            .lock()
            .map(|j| j.requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        _params: LoadParameters,
    ) -> LlmResult<Box<dyn ModelSession>> {
        if self.failing.contains(&descriptor.name) {
            return Err(LlmError::LoadFailed {
                model: descriptor.name.clone(),
                message: "scripted load failure".to_string(),
            });
        }
        if let Ok(mut journal) = self.journal.lock() {
            journal.loads.push(descriptor.name.clone());
        }
        Ok(Box::new(ScriptedSession {
            model: descriptor.name.clone(),
            chunk_budget: self.chunk_budget,
            responder: self.responder.clone(),
            journal: self.journal.clone(),
        }))
    }
}

/// Resident scripted model. Units are characters.
pub struct ScriptedSession {
    model: String,
    chunk_budget: usize,
    responder: Responder,
    journal: Arc<Mutex<Journal>>,
}

impl ScriptedSession {
    /// Standalone session, for exercising session consumers directly.
    pub fn new<F>(model: impl Into<String>, chunk_budget: usize, responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> ScriptedReply + Send + Sync + 'static,
    {
        Self {
            model: model.into(),
            chunk_budget,
            responder: Arc::new(move |_, req| responder(req)),
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }

    fn reply(&self, request: &ChatRequest) -> ScriptedReply {
        if let Ok(mut journal) = self.journal.lock() {
            journal.requests.push((self.model.clone(), request.clone()));
        }
        (self.responder)(&self.model, request)
    }
}

#[async_trait]
impl ModelSession for ScriptedSession {
    async fn complete(&self, request: &ChatRequest) -> LlmResult<LlmResponse> {
        match self.reply(request) {
            ScriptedReply::Text(text) => Ok(LlmResponse::text(&self.model, text)),
            ScriptedReply::Fragments(parts) => Ok(LlmResponse::text(&self.model, parts.concat())),
            ScriptedReply::Fail(err) => Err(err),
        }
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> LlmResult<LlmResponse> {
        let fragments = match self.reply(request) {
            ScriptedReply::Text(text) => text.split_inclusive(' ').map(str::to_string).collect(),
            ScriptedReply::Fragments(parts) => parts,
            ScriptedReply::Fail(err) => return Err(err),
        };

        let mut content = String::new();
        for fragment in fragments {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            content.push_str(&fragment);
            if tx.send(StreamEvent::text(fragment)).await.is_err() {
                return Err(LlmError::Cancelled);
            }
        }
        Ok(LlmResponse::text(&self.model, content))
    }

    fn count_units(&self, text: &str) -> usize {
        text.chars().count()
    }

    fn chunk_budget(&self) -> usize {
        self.chunk_budget
    }

    async fn release(&self) -> LlmResult<()> {
        if let Ok(mut journal) = self.journal.lock() {
            journal.releases.push(self.model.clone());
        }
        Ok(())
    }
}
