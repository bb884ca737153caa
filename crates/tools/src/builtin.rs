//! Built-in Tools
//!
//! `read_file` and `write_file`, plus the `plan_steps` definition the
//! planner advertises.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use orchestrator_llm::{ParameterSchema, ToolDefinition};

use crate::executor::ToolResult;
use crate::registry::{Tool, ToolExecutionContext, ToolRegistry};

/// Name of the planning function.
pub const PLAN_STEPS_TOOL: &str = "plan_steps";

fn string_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolResult> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolResult::err(format!("Missing required parameter: {}", key)))
}

/// Read a text file.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        let mut properties = HashMap::new();
        properties.insert(
            "path".to_string(),
            ParameterSchema::string(Some("Path of the file to read")),
        );
        ParameterSchema::object(None, properties, vec!["path".to_string()])
    }

    async fn execute(&self, ctx: &ToolExecutionContext, args: Value) -> ToolResult {
        let path = match string_arg(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let resolved = ctx.resolve(path);

        match tokio::fs::try_exists(&resolved).await {
            Ok(true) => {}
            Ok(false) => return ToolResult::ok(format!("Error: File '{}' does not exist.", path)),
            Err(e) => return ToolResult::err(format!("Error reading file '{}': {}", path, e)),
        }

        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => ToolResult::ok(content),
            Err(e) => ToolResult::err(format!("Error reading file '{}': {}", path, e)),
        }
    }
}

/// Write a text file, creating parent directories as needed.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file and parent directories if needed, overwrites otherwise."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        let mut properties = HashMap::new();
        properties.insert(
            "path".to_string(),
            ParameterSchema::string(Some("Path of the file to write")),
        );
        properties.insert(
            "content".to_string(),
            ParameterSchema::string(Some("Text to write")),
        );
        ParameterSchema::object(
            None,
            properties,
            vec!["path".to_string(), "content".to_string()],
        )
    }

    async fn execute(&self, ctx: &ToolExecutionContext, args: Value) -> ToolResult {
        let path = match string_arg(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = match string_arg(&args, "content") {
            Ok(c) => c,
            Err(e) => return e,
        };
        let resolved = ctx.resolve(path);

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::err(format!("Error writing to '{}': {}", path, e));
            }
        }

        match tokio::fs::write(&resolved, content).await {
            Ok(()) => ToolResult::ok(format!("Successfully wrote to '{}'.", path)),
            Err(e) => ToolResult::err(format!("Error writing to '{}': {}", path, e)),
        }
    }
}

/// Register `read_file` and `write_file`.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
}

/// Definition of the `plan_steps` function:
/// `{steps: [{step, prompt, tool?}]}`.
pub fn plan_steps_definition() -> ToolDefinition {
    let mut step_properties = HashMap::new();
    step_properties.insert(
        "step".to_string(),
        ParameterSchema::string(Some("Short name of the step")),
    );
    step_properties.insert(
        "prompt".to_string(),
        ParameterSchema::string(Some("Instruction for this step")),
    );
    step_properties.insert(
        "tool".to_string(),
        ParameterSchema::string(Some("Tool to use for this step, if any")),
    );
    let step = ParameterSchema::object(
        None,
        step_properties,
        vec!["step".to_string(), "prompt".to_string()],
    );

    let mut properties = HashMap::new();
    properties.insert(
        "steps".to_string(),
        ParameterSchema::array(Some("Ordered steps"), step),
    );

    ToolDefinition {
        name: PLAN_STEPS_TOOL.to_string(),
        description: "Produce an ordered plan of steps that answers the user's request."
            .to_string(),
        input_schema: ParameterSchema::object(None, properties, vec!["steps".to_string()]),
    }
}
