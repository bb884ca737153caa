//! Orchestrator Tools
//!
//! Tool execution for the orchestrator:
//! - `Tool` trait, `FunctionTool` and the validating `ToolRegistry`
//! - Tool-call parser for text-emitted calls (JSON and XML dialects)
//! - Built-in file tools and the planner's `plan_steps` definition

pub mod builtin;
pub mod executor;
pub mod parser;
pub mod registry;

pub use builtin::{
    plan_steps_definition, register_builtin_tools, ReadFileTool, WriteFileTool, PLAN_STEPS_TOOL,
};
pub use executor::ToolResult;
pub use parser::{
    build_tool_call_instructions, decode_html_entities, format_tool_result, parse_tool_calls,
    ParsedToolCall,
};
pub use registry::{FunctionTool, Tool, ToolExecutionContext, ToolRegistry, DEFAULT_TOOL_TIMEOUT};
