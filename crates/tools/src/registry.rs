//! Tool Trait and Registry
//!
//! Tools are typed handlers registered under validated names. The registry
//! rejects unknown names before anything runs, checks required arguments
//! against the tool's schema, and bounds every call with a timeout.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use orchestrator_llm::{ParameterSchema, ToolDefinition};

use crate::executor::ToolResult;

/// Default per-call timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Context provided to each tool during execution.
#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    /// Conversation the call belongs to
    pub session_id: String,
    /// Base directory for relative paths
    pub working_directory: PathBuf,
    /// Cancellation token for cooperative cancellation
    pub cancellation_token: CancellationToken,
}

impl ToolExecutionContext {
    pub fn new(session_id: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            working_directory: working_directory.into(),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Resolve `path` against the working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = PathBuf::from(path);
        if candidate.is_absolute() {
            candidate
        } else {
            self.working_directory.join(candidate)
        }
    }
}

/// Unified tool interface.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name of this tool (e.g., "read_file")
    fn name(&self) -> &str;

    /// Human-readable description of what this tool does
    fn description(&self) -> &str;

    /// JSON schema describing the tool's input parameters
    fn parameters_schema(&self) -> ParameterSchema;

    /// Execute the tool. Failures are reported as `ToolResult::err`.
    async fn execute(&self, ctx: &ToolExecutionContext, args: Value) -> ToolResult;
}

type BoxedHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = ToolResult> + Send>> + Send + Sync>;

/// A tool backed by an async closure.
pub struct FunctionTool {
    name: String,
    description: String,
    schema: ParameterSchema,
    handler: BoxedHandler,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ParameterSchema,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> ParameterSchema {
        self.schema.clone()
    }

    async fn execute(&self, _ctx: &ToolExecutionContext, args: Value) -> ToolResult {
        (self.handler)(args).await
    }
}

/// Registry of available tools, iterated in registration order.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a tool. If a tool with the same name already exists, it is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.parameters_schema(),
            })
            .collect()
    }

    /// Get all registered tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name.
    ///
    /// Unknown names and missing required arguments are rejected before the
    /// tool runs. The call runs on its own task, so a panicking handler or a
    /// timeout becomes an error result.
    pub async fn execute(&self, name: &str, ctx: &ToolExecutionContext, args: Value) -> ToolResult {
        let Some(tool) = self.get(name) else {
            tracing::warn!("ToolRegistry: rejected unknown tool '{}'", name);
            return ToolResult::err(format!(
                "Unknown tool '{}'. Available tools: {}",
                name,
                self.order.join(", ")
            ));
        };

        if let Err(message) = check_required(&tool.parameters_schema(), &args) {
            return ToolResult::rejected(name, message);
        }

        let task_ctx = ctx.clone();
        let task_tool = tool.clone();
        let mut handle =
            tokio::spawn(async move { task_tool.execute(&task_ctx, args).await });

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(result)) => {
                tracing::debug!("ToolRegistry: '{}' finished (success={})", name, result.success);
                result
            }
            Ok(Err(e)) => {
                tracing::error!("ToolRegistry: '{}' failed to complete: {}", name, e);
                ToolResult::err(format!("Tool '{}' failed: {}", name, e))
            }
            Err(_) => {
                handle.abort();
                tracing::warn!(
                    "ToolRegistry: '{}' timed out after {}s",
                    name,
                    self.timeout.as_secs_f32()
                );
                ToolResult::timed_out(name, self.timeout)
            }
        }
    }
}

/// Check that every required argument is present and non-null.
fn check_required(schema: &ParameterSchema, args: &Value) -> Result<(), String> {
    let required = schema.required_names();
    if required.is_empty() {
        return Ok(());
    }
    let Some(object) = args.as_object() else {
        return Err("Arguments must be a JSON object".to_string());
    };
    for key in required {
        match object.get(key) {
            Some(Value::Null) | None => {
                return Err(format!("Missing required argument '{}'", key));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
