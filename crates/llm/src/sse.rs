//! Chat-Completion SSE Adapter
//!
//! Decodes the `data:` lines llama-server sends on its OpenAI-compatible
//! `/v1/chat/completions` stream. Text deltas pass straight through; native
//! tool calls arrive as argument fragments and are emitted once complete; an
//! `error` payload ends the stream. `data: [DONE]` marks the end.

use serde::Deserialize;

use orchestrator_core::{AdapterError, StreamAdapter, StreamEvent};

const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(default)]
    choices: Vec<FrameChoice>,
    #[serde(default)]
    error: Option<FrameError>,
}

#[derive(Debug, Deserialize)]
struct FrameChoice {
    #[serde(default)]
    delta: Option<FrameDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrameDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionFragment>,
}

#[derive(Debug, Deserialize)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrameError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Tool call whose arguments are still arriving.
#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingCall {
    fn into_event(self) -> StreamEvent {
        StreamEvent::ToolComplete {
            tool_id: self.id,
            tool_name: self.name,
            arguments: self.arguments,
        }
    }
}

/// Line decoder for the chat-completion stream.
#[derive(Debug, Default)]
pub struct ChatCompletionAdapter {
    pending: Option<PendingCall>,
    finished: bool,
}

impl ChatCompletionAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(call) = self.pending.take() {
            events.push(call.into_event());
        }
    }

    fn absorb(&mut self, fragment: ToolCallFragment, events: &mut Vec<StreamEvent>) {
        let (name, arguments) = match fragment.function {
            Some(f) => (f.name, f.arguments),
            None => (None, None),
        };
        if fragment.id.is_some() || name.is_some() {
            self.flush(events);
            self.pending = Some(PendingCall {
                id: fragment.id.unwrap_or_default(),
                name: name.unwrap_or_default(),
                arguments: String::new(),
            });
        }
        if let (Some(call), Some(arguments)) = (self.pending.as_mut(), arguments) {
            call.arguments.push_str(&arguments);
        }
    }
}

impl StreamAdapter for ChatCompletionAdapter {
    fn adapt(&mut self, line: &str) -> Result<Vec<StreamEvent>, AdapterError> {
        let line = line.trim();
        // Blank separators and `:` keep-alive comments carry nothing.
        if line.is_empty() || line.starts_with(':') {
            return Ok(Vec::new());
        }
        let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
            if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") {
                return Ok(Vec::new());
            }
            return Err(AdapterError::Malformed(line.to_string()));
        };

        let mut events = Vec::new();
        if payload == DONE_MARKER {
            self.flush(&mut events);
            self.finished = true;
            return Ok(events);
        }

        let frame: Frame =
            serde_json::from_str(payload).map_err(|e| AdapterError::Payload(e.to_string()))?;

        if let Some(error) = frame.error {
            self.pending = None;
            self.finished = true;
            events.push(StreamEvent::Error {
                message: error.message,
                code: error.code.map(|c| match c {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                }),
            });
            return Ok(events);
        }

        for choice in frame.choices {
            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                    events.push(StreamEvent::text(content));
                }
                for fragment in delta.tool_calls.unwrap_or_default() {
                    self.absorb(fragment, &mut events);
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.flush(&mut events);
                events.push(StreamEvent::Complete {
                    stop_reason: Some(reason),
                });
            }
        }
        Ok(events)
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn reset(&mut self) {
        self.pending = None;
        self.finished = false;
    }
}
