//! Tool Results
//!
//! What one tool call produced. A failed call is data, not an error: the
//! orchestrator folds it into the step context as an `Error: ...` section so
//! the model can see what went wrong and the plan keeps going.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome of one tool call. Exactly one of `output` and `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// The call was refused before the tool ran.
    pub fn rejected(tool: &str, reason: impl std::fmt::Display) -> Self {
        Self::err(format!("{} for tool '{}'", reason, tool))
    }

    /// The call did not finish within `limit`.
    pub fn timed_out(tool: &str, limit: Duration) -> Self {
        Self::err(format!(
            "Tool '{}' timed out after {}s",
            tool,
            limit.as_secs_f32()
        ))
    }

    /// Text folded into the running context.
    pub fn to_content(&self) -> String {
        match (self.success, &self.output, &self.error) {
            (true, Some(output), _) => output.clone(),
            (true, None, _) => String::new(),
            (false, _, Some(error)) => format!("Error: {}", error),
            (false, _, None) => "Error: tool failed without a message".to_string(),
        }
    }

    /// Consume a successful result, yielding its output.
    pub fn into_output(self) -> Option<String> {
        if self.success {
            self.output
        } else {
            None
        }
    }
}
