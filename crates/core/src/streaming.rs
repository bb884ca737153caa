//! Stream Events
//!
//! What a streaming generation produces, independent of the backend. The
//! server engine decodes server-sent event lines into these through a
//! [`StreamAdapter`]; the embedded engine emits them from its token callback.
//! Downstream, the loop guard forwards `TextDelta` fragments and stops on the
//! first `Error`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One event of a streaming generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Next fragment of generated text
    TextDelta { content: String },

    /// A native tool call whose arguments have been fully received
    ToolComplete {
        tool_id: String,
        tool_name: String,
        /// Raw JSON text of the arguments
        arguments: String,
    },

    /// The backend reported a failure mid-stream
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// The backend finished the generation
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
}

impl StreamEvent {
    pub fn text(content: impl Into<String>) -> Self {
        StreamEvent::TextDelta {
            content: content.into(),
        }
    }

    /// Fragment text, for `TextDelta` events.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            StreamEvent::TextDelta { content } => Some(content),
            _ => None,
        }
    }

    /// Whether nothing follows this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error { .. } | StreamEvent::Complete { .. })
    }
}

/// A stream line that could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The line is not in the expected framing
    #[error("Malformed stream line: {0}")]
    Malformed(String),

    /// The framing was fine but the payload did not decode
    #[error("Undecodable stream payload: {0}")]
    Payload(String),
}

/// Decodes a backend's line-oriented stream format.
pub trait StreamAdapter: Send {
    /// Decode one line. A line may yield any number of events.
    fn adapt(&mut self, line: &str) -> Result<Vec<StreamEvent>, AdapterError>;

    /// Whether the end-of-stream marker has been seen.
    fn is_finished(&self) -> bool;

    /// Forget partial state so the adapter can decode a new stream.
    fn reset(&mut self);
}
