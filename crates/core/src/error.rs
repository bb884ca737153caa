//! Core Error Types
//!
//! The error taxonomy shared by every crate in the workspace. Each variant
//! maps to one failure class of the orchestration pipeline; helpers decide
//! which classes may end a request early.

use thiserror::Error;

/// Error type for the inference orchestrator workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed or missing configuration, fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// A model resource failed to initialize
    #[error("Load error: {0}")]
    Load(String),

    /// Unparseable model output
    #[error("Parse error: {0}")]
    Parse(String),

    /// A tool callable raised or reported failure
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Repetition detected in streamed output after the retry was spent
    #[error("Generation loop detected: {0}")]
    LoopDetected(String),

    /// Backend unreachable, timed out or returned an error
    #[error("Transport error: {0}")]
    Transport(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request was cancelled by the client
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a load error
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a tool execution error
    pub fn tool_execution(msg: impl Into<String>) -> Self {
        Self::ToolExecution(msg.into())
    }

    /// Create a loop-detected error
    pub fn loop_detected(msg: impl Into<String>) -> Self {
        Self::LoopDetected(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error may terminate a request before synthesis.
    ///
    /// Only resource-load and transport failures qualify; everything else
    /// degrades to a heuristic or an error step result.
    pub fn is_fatal_to_request(&self) -> bool {
        matches!(self, Self::Load(_) | Self::Transport(_))
    }
}

/// Convert CoreError to a string
impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
