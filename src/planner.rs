//! Planner
//!
//! Asks a planning-capable model for a `plan_steps` call and turns it into a
//! [`Plan`]. Anything short of a usable plan degrades to the single
//! `answer_query` step; only model load failures are returned as errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use orchestrator_core::{CoreError, CoreResult, Message};
use orchestrator_llm::{AskOptions, LlmError, ModelDescriptor, ModelResourceManager};
use orchestrator_tools::{
    build_tool_call_instructions, parse_tool_calls, plan_steps_definition, ToolRegistry,
    PLAN_STEPS_TOOL,
};

/// Name of the fallback step.
pub const ANSWER_QUERY_STEP: &str = "answer_query";

/// Characters of each known context entry shown to the planner.
const CONTEXT_SNIPPET_CHARS: usize = 1_000;

/// One unit of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub prompt: String,
    pub tool: Option<String>,
}

/// Ordered steps produced once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    /// Single `answer_query` step carrying the query.
    pub fn fallback(query: &str) -> Self {
        Self {
            steps: vec![Step {
                name: ANSWER_QUERY_STEP.to_string(),
                prompt: query.to_string(),
                tool: None,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Prompt asking for a `plan_steps` call.
pub fn planner_prompt(query: &str, known_context: &[(String, String)]) -> String {
    let snippet = if known_context.is_empty() {
        "(none)".to_string()
    } else {
        known_context
            .iter()
            .map(|(key, value)| {
                let shown: String = value.chars().take(CONTEXT_SNIPPET_CHARS).collect();
                format!("{}: {}", key, shown)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are a planner. Given the user's request and the current context, produce an \
         ordered list of steps that achieves the user's goal. Each step has a `step` (short \
         name) and a `prompt` (what to do). If a step needs a tool, put the tool name in `tool`.\n\n\
         User request:\n{query}\n\n\
         Current context (summaries of what has already been read):\n{snippet}\n\n\
         Return the plan by calling `{PLAN_STEPS_TOOL}` with the argument `steps`. \
         If nothing needs to be read and you can answer directly, use a single \
         `{ANSWER_QUERY_STEP}` step whose prompt is the final instruction."
    )
}

/// Canonicalize raw step values.
///
/// `step`/`action` name the step (default `unknown`), `prompt`/`instruction`
/// carry the instruction (default: the query), and a `tool` of `null`, `""`
/// or `"none"` means no tool. Non-object entries become `unknown` steps whose
/// prompt is the entry's text.
pub fn canonicalize_steps(values: &[Value], query: &str, max_steps: usize) -> Vec<Step> {
    values
        .iter()
        .take(max_steps)
        .map(|value| match value.as_object() {
            Some(object) => {
                let text = |keys: &[&str]| {
                    keys.iter()
                        .filter_map(|k| object.get(*k))
                        .filter_map(|v| v.as_str())
                        .map(str::trim)
                        .find(|s| !s.is_empty())
                        .map(str::to_string)
                };
                let tool = text(&["tool"]).filter(|t| !t.eq_ignore_ascii_case("none"));
                Step {
                    name: text(&["step", "action"]).unwrap_or_else(|| "unknown".to_string()),
                    prompt: text(&["prompt", "instruction"]).unwrap_or_else(|| query.to_string()),
                    tool,
                }
            }
            None => Step {
                name: "unknown".to_string(),
                prompt: value
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string()),
                tool: None,
            },
        })
        .collect()
}

/// Extract a plan from a planner reply: the first `plan_steps` call, else a
/// JSON object with a `steps` array.
pub fn plan_from_reply(reply: &str, query: &str, max_steps: usize) -> Option<Plan> {
    let from_call = parse_tool_calls(reply)
        .into_iter()
        .find(|call| call.name == PLAN_STEPS_TOOL)
        .and_then(|call| steps_array(call.arguments.get("steps")?));

    let steps = from_call.or_else(|| {
        let value: Value = serde_json::from_str(reply.trim()).ok()?;
        steps_array(value.get("steps")?)
    })?;

    let steps = canonicalize_steps(&steps, query, max_steps);
    if steps.is_empty() {
        None
    } else {
        Some(Plan { steps })
    }
}

/// `steps` may arrive as an array or as a JSON string holding one.
fn steps_array(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw).ok()? {
            Value::Array(items) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Ask `descriptor` for a plan.
pub async fn generate_plan(
    manager: &ModelResourceManager,
    descriptor: &ModelDescriptor,
    registry: &ToolRegistry,
    query: &str,
    known_context: &[(String, String)],
    max_steps: usize,
) -> CoreResult<Plan> {
    let mut tools = vec![plan_steps_definition()];
    tools.extend(registry.definitions());
    let options = AskOptions::with_tools(tools.clone()).system(build_tool_call_instructions(&tools));
    let messages = [Message::user(planner_prompt(query, known_context))];

    let response = match manager.ask(descriptor, &messages, &options).await {
        Ok(response) => response,
        Err(e @ (LlmError::LoadFailed { .. } | LlmError::ModelNotFound { .. })) => {
            return Err(CoreError::from(e));
        }
        Err(e) => {
            tracing::warn!("Planner: request failed, using fallback plan: {}", e);
            return Ok(Plan::fallback(query));
        }
    };

    let reply = response.text_for_parsing();
    tracing::debug!(
        "Planner: raw reply (native calls: {}, first 400 chars): {:?}",
        response.has_tool_calls(),
        reply.chars().take(400).collect::<String>()
    );

    match plan_from_reply(&reply, query, max_steps) {
        Some(plan) => {
            tracing::info!("Planner: plan with {} steps", plan.len());
            Ok(plan)
        }
        None => {
            tracing::warn!("Planner: no structured plan in reply, using fallback plan");
            Ok(Plan::fallback(query))
        }
    }
}
