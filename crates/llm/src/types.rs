//! Inference Types
//!
//! Request/response types shared by both inference engines, the tool
//! schema types advertised to models, and the backend-level error enum.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use orchestrator_core::{CoreError, Message};

/// Temperature for tool-use, planning and synthesis calls.
pub const TOOL_USE_TEMPERATURE: f32 = 0.3;

/// Temperature for chunk summaries.
pub const SUMMARY_TEMPERATURE: f32 = 0.2;

/// JSON-schema-like description of a tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, ParameterSchema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterSchema>>,
}

impl ParameterSchema {
    fn leaf(schema_type: &str, description: Option<&str>) -> Self {
        Self {
            schema_type: schema_type.to_string(),
            description: description.map(|s| s.to_string()),
            properties: None,
            required: None,
            items: None,
        }
    }

    /// Create a string schema
    pub fn string(description: Option<&str>) -> Self {
        Self::leaf("string", description)
    }

    /// Create an object schema
    pub fn object(
        description: Option<&str>,
        properties: HashMap<String, ParameterSchema>,
        required: Vec<String>,
    ) -> Self {
        Self {
            properties: Some(properties),
            required: Some(required),
            ..Self::leaf("object", description)
        }
    }

    /// Create an array schema
    pub fn array(description: Option<&str>, items: ParameterSchema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::leaf("array", description)
        }
    }

    /// Names of required properties (empty when none are declared)
    pub fn required_names(&self) -> &[String] {
        self.required.as_deref().unwrap_or(&[])
    }
}

/// Definition of a tool that can be called by a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique name of the tool
    pub name: String,
    /// Description of what the tool does
    pub description: String,
    /// JSON schema for the tool's input parameters
    pub input_schema: ParameterSchema,
}

impl ToolDefinition {
    /// `{type: "function", function: {name, description, parameters}}`
    pub fn to_function_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

/// A native tool call returned by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Backend-assigned call id (may be empty)
    pub id: String,
    /// Name of the tool to call
    pub name: String,
    /// Arguments to pass to the tool
    pub arguments: serde_json::Value,
}

/// Stop reason for the response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response
    EndTurn,
    /// Hit max tokens limit
    MaxTokens,
    /// Stopped at a stop sequence
    StopSequence,
    /// Model wants to use a tool
    ToolUse,
    /// Other/unknown reason
    Other(String),
}

impl From<&str> for StopReason {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "end_turn" | "stop" => StopReason::EndTurn,
            "max_tokens" | "length" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            "tool_use" | "tool_calls" | "function_call" => StopReason::ToolUse,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// Response from an inference engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Text content of the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls requested by the model
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Why the response ended
    pub stop_reason: StopReason,
    /// The model that generated the response
    pub model: String,
}

impl LlmResponse {
    /// Plain text reply with a natural stop.
    pub fn text(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            model: model.into(),
        }
    }

    /// Check if the response has tool calls
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Text content, or an empty string
    pub fn content_text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Text content followed by native tool calls rendered as
    /// `<tool_call>` JSON blocks, so one parser handles both forms.
    pub fn text_for_parsing(&self) -> String {
        let mut out = self.content_text().to_string();
        for call in &self.tool_calls {
            let block = serde_json::json!({
                "name": call.name,
                "arguments": call.arguments,
            });
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("<tool_call>{}</tool_call>", block));
        }
        out
    }
}

/// Per-call generation options.
#[derive(Debug, Clone, PartialEq)]
pub struct AskOptions {
    /// Sampling temperature
    pub temperature: f32,
    /// Tools advertised to the model (empty = none)
    pub tools: Vec<ToolDefinition>,
    /// System prompt prepended once before the messages
    pub system_prompt: Option<String>,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            temperature: TOOL_USE_TEMPERATURE,
            tools: Vec::new(),
            system_prompt: None,
        }
    }
}

impl AskOptions {
    /// Options for a tool-enabled call
    pub fn with_tools(tools: Vec<ToolDefinition>) -> Self {
        Self {
            tools,
            ..Self::default()
        }
    }

    /// Options for a chunk summary
    pub fn summary() -> Self {
        Self {
            temperature: SUMMARY_TEMPERATURE,
            ..Self::default()
        }
    }

    pub fn system(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Fully assembled request handed to a resident model.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Messages with the system prompt (if any) first
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(messages: &[Message], options: &AskOptions) -> Self {
        let mut assembled = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = options.system_prompt.as_ref() {
            assembled.push(Message::system(system.clone()));
        }
        assembled.extend(messages.iter().cloned());
        Self {
            messages: assembled,
            tools: options.tools.clone(),
            temperature: options.temperature,
        }
    }
}

/// Backend error types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmError {
    /// Network/connection error
    NetworkError { message: String },
    /// Response parsing error
    ParseError { message: String },
    /// Server error from the backend
    ServerError {
        message: String,
        status: Option<u16>,
    },
    /// Invalid request (bad parameters)
    InvalidRequest { message: String },
    /// Model not found or not available
    ModelNotFound { model: String },
    /// Model failed to load
    LoadFailed { model: String, message: String },
    /// Backend not available (server not running, no binding)
    ProviderUnavailable { message: String },
    /// Deadline exceeded
    Timeout { message: String },
    /// Generation cancelled by the caller
    Cancelled,
    /// Other error
    Other { message: String },
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::NetworkError { message } => write!(f, "Network error: {}", message),
            LlmError::ParseError { message } => write!(f, "Parse error: {}", message),
            LlmError::ServerError { message, status } => {
                if let Some(s) = status {
                    write!(f, "Server error ({}): {}", s, message)
                } else {
                    write!(f, "Server error: {}", message)
                }
            }
            LlmError::InvalidRequest { message } => write!(f, "Invalid request: {}", message),
            LlmError::ModelNotFound { model } => write!(f, "Model not found: {}", model),
            LlmError::LoadFailed { model, message } => {
                write!(f, "Failed to load model '{}': {}", model, message)
            }
            LlmError::ProviderUnavailable { message } => {
                write!(f, "Backend unavailable: {}", message)
            }
            LlmError::Timeout { message } => write!(f, "Timed out: {}", message),
            LlmError::Cancelled => write!(f, "Generation cancelled"),
            LlmError::Other { message } => write!(f, "Error: {}", message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Result type for inference operations
pub type LlmResult<T> = Result<T, LlmError>;

impl From<LlmError> for CoreError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::LoadFailed { .. } | LlmError::ModelNotFound { .. } => {
                CoreError::load(err.to_string())
            }
            LlmError::Cancelled => CoreError::cancelled(err.to_string()),
            other => CoreError::transport(other.to_string()),
        }
    }
}
