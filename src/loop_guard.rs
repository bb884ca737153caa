//! Loop Guard
//!
//! Repetition detector for streamed generation. A sliding window of the most
//! recent fragments is hashed once full; when one window hash has been seen
//! `threshold` times the generation is considered stuck.
//!
//! [`GuardedStream`] drives a streaming generation through the guard with at
//! most one retry:
//!
//! ```text
//! Streaming --done--> Succeeded
//! Streaming --loop--> Retrying --done--> Succeeded
//!                     Retrying --loop--> Failed (LoopDetected)
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::hash::{Hash, Hasher};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use orchestrator_core::{CoreError, CoreResult, Message, SinkMessage, StreamEvent, TransportSink};
use orchestrator_llm::{LlmResponse, LlmResult};

/// Fragments kept in the window.
pub const DEFAULT_WINDOW: usize = 12;

/// Occurrences of one window hash that count as a loop.
pub const DEFAULT_THRESHOLD: u32 = 5;

/// Appended to the request when it is re-issued after a loop.
pub const NO_REPEAT_INSTRUCTION: &str = "Your previous answer started repeating the same text over and over. \
     Answer again from the beginning and do not repeat any sentence or phrase.";

/// Sliding-window repetition detector.
#[derive(Debug)]
pub struct LoopGuard {
    window: VecDeque<String>,
    window_size: usize,
    threshold: u32,
    counts: HashMap<u64, u32>,
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_THRESHOLD)
    }
}

impl LoopGuard {
    pub fn new(window_size: usize, threshold: u32) -> Self {
        let window_size = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            threshold: threshold.max(1),
            counts: HashMap::new(),
        }
    }

    /// Record a fragment. Returns `true` when a loop is detected.
    pub fn observe(&mut self, fragment: &str) -> bool {
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(fragment.to_string());
        if self.window.len() < self.window_size {
            return false;
        }

        let mut hasher = DefaultHasher::new();
        for part in &self.window {
            part.hash(&mut hasher);
        }
        let count = self.counts.entry(hasher.finish()).or_insert(0);
        *count += 1;
        *count >= self.threshold
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.counts.clear();
    }
}

/// Position of a guarded stream in its retry state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Streaming,
    Retrying,
    Succeeded,
    Failed,
}

enum Forwarded {
    Done(String),
    Looped,
    Cancelled,
    Failed(CoreError),
}

/// Streams a generation to a sink through a [`LoopGuard`], retrying once.
#[derive(Debug)]
pub struct GuardedStream {
    window: usize,
    threshold: u32,
    state: StreamState,
}

impl Default for GuardedStream {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_THRESHOLD)
    }
}

impl GuardedStream {
    pub fn new(window: usize, threshold: u32) -> Self {
        Self {
            window,
            threshold,
            state: StreamState::Streaming,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Run `generate` and forward its text fragments to `sink` as chunks.
    ///
    /// `generate` receives the messages, the event channel and a per-attempt
    /// cancellation token. Returns the text forwarded by the attempt that
    /// completed.
    pub async fn run<F, Fut>(
        &mut self,
        messages: Vec<Message>,
        mut generate: F,
        sink: &dyn TransportSink,
        cancel: &CancellationToken,
    ) -> CoreResult<String>
    where
        F: FnMut(Vec<Message>, mpsc::Sender<StreamEvent>, CancellationToken) -> Fut,
        Fut: Future<Output = LlmResult<LlmResponse>>,
    {
        let mut guard = LoopGuard::new(self.window, self.threshold);
        let mut request = messages;
        self.state = StreamState::Streaming;

        loop {
            let attempt_cancel = cancel.child_token();
            let (tx, rx) = mpsc::channel(64);
            let generation = generate(request.clone(), tx, attempt_cancel.clone());
            let forwarding = forward(rx, &mut guard, sink, cancel, &attempt_cancel);
            let (generated, forwarded) = tokio::join!(generation, forwarding);

            match forwarded {
                Forwarded::Done(text) => match generated {
                    Ok(_) => {
                        self.state = StreamState::Succeeded;
                        return Ok(text);
                    }
                    Err(e) => {
                        self.state = StreamState::Failed;
                        return Err(e.into());
                    }
                },
                Forwarded::Looped if self.state == StreamState::Streaming => {
                    tracing::warn!("LoopGuard: repetition detected, retrying once");
                    self.state = StreamState::Retrying;
                    guard.reset();
                    request.push(Message::user(NO_REPEAT_INSTRUCTION));
                }
                Forwarded::Looped => {
                    tracing::error!("LoopGuard: repetition detected again after retry");
                    self.state = StreamState::Failed;
                    return Err(CoreError::loop_detected(
                        "the model kept repeating itself after one retry",
                    ));
                }
                Forwarded::Cancelled => {
                    self.state = StreamState::Failed;
                    return Err(CoreError::cancelled("stream cancelled"));
                }
                Forwarded::Failed(e) => {
                    self.state = StreamState::Failed;
                    return Err(e);
                }
            }
        }
    }
}

/// Forward text deltas until the channel closes, a loop is detected, or the
/// request is cancelled. Dropping `rx` on early exit unblocks the generator.
async fn forward(
    mut rx: mpsc::Receiver<StreamEvent>,
    guard: &mut LoopGuard,
    sink: &dyn TransportSink,
    cancel: &CancellationToken,
    attempt_cancel: &CancellationToken,
) -> Forwarded {
    let mut text = String::new();
    while let Some(event) = rx.recv().await {
        if cancel.is_cancelled() {
            attempt_cancel.cancel();
            return Forwarded::Cancelled;
        }
        match event {
            StreamEvent::TextDelta { content } => {
                if guard.observe(&content) {
                    attempt_cancel.cancel();
                    return Forwarded::Looped;
                }
                if let Err(e) = sink.send(SinkMessage::chunk(content.clone())).await {
                    tracing::warn!("LoopGuard: sink closed, cancelling stream: {}", e);
                    attempt_cancel.cancel();
                    cancel.cancel();
                    return Forwarded::Cancelled;
                }
                text.push_str(&content);
            }
            StreamEvent::Error { message, .. } => {
                attempt_cancel.cancel();
                return Forwarded::Failed(CoreError::transport(message));
            }
            StreamEvent::ToolComplete { .. } | StreamEvent::Complete { .. } => {}
        }
    }
    Forwarded::Done(text)
}
