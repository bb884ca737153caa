//! Plan Orchestrator
//!
//! Drives one request through `Planning -> Executing(1..N) -> Synthesizing ->
//! Done`. Steps run strictly in order and each step sees the results of the
//! ones before it. A failed step is recorded and the plan continues; only
//! load failures during planning, cancellation and failures of the final
//! stream end a request early. Every request ends with exactly one `[DONE]`
//! frame.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use orchestrator_core::{
    ConversationStore, CoreError, CoreResult, Message, MessageRole, SinkMessage, TransportSink,
};
use orchestrator_llm::{AskOptions, ModelCatalog, ModelDescriptor, ModelResourceManager, ModelRole};
use orchestrator_tools::{
    build_tool_call_instructions, format_tool_result, parse_tool_calls, ToolExecutionContext,
    ToolRegistry, ToolResult,
};

use crate::config::ModelAssignments;
use crate::loop_guard::{GuardedStream, DEFAULT_THRESHOLD, DEFAULT_WINDOW};
use crate::planner::{generate_plan, Plan, Step};

/// Sent to the client before planning starts.
pub const ACK_MESSAGE: &str = "Let me have a look...";

/// Separator between aggregated context sections.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Earlier answers from the same conversation shown to the planner.
const PLANNER_HISTORY: usize = 3;

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub ok: bool,
    pub tool: Option<String>,
    /// Step output, or the error text when `ok` is false
    pub result: String,
}

/// Successful step outputs keyed `step_<index>_<name>`, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextStore {
    entries: Vec<(String, String)>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for the step at 1-based `index`.
    pub fn key(index: usize, step_name: &str) -> String {
        format!("step_{}_{}", index, step_name)
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a completed request produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub plan: Plan,
    pub step_results: Vec<StepResult>,
    pub final_text: String,
}

/// Models used at each call site.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRoutes {
    pub planner: ModelDescriptor,
    pub tool: ModelDescriptor,
    pub reader: ModelDescriptor,
    pub synthesis: ModelDescriptor,
}

impl ModelRoutes {
    /// Same model everywhere.
    pub fn single(descriptor: ModelDescriptor) -> Self {
        Self {
            planner: descriptor.clone(),
            tool: descriptor.clone(),
            reader: descriptor.clone(),
            synthesis: descriptor,
        }
    }

    /// Resolve configured names, falling back to role preferences.
    pub fn resolve(catalog: &ModelCatalog, assignments: &ModelAssignments) -> CoreResult<Self> {
        use ModelRole::*;
        let pick = |name: &Option<String>, roles: &[ModelRole]| {
            catalog.select(name.as_deref(), roles).cloned()
        };
        Ok(Self {
            planner: pick(
                &assignments.planner,
                &[Instruct, Tool, General, Granite, Thinker, Reasoning, Coder],
            )?,
            tool: pick(
                &assignments.tool,
                &[Tool, Instruct, Granite, General, Coder, Thinker, Reasoning],
            )?,
            reader: pick(
                &assignments.reader,
                &[Instruct, General, Tool, Granite, Thinker, Reasoning, Coder],
            )?,
            synthesis: pick(
                &assignments.synthesis,
                &[Instruct, General, Reasoning, Thinker, Tool, Granite, Coder],
            )?,
        })
    }
}

/// Limits applied to each request.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub max_tool_iterations: usize,
    pub max_plan_steps: usize,
    pub loop_window: usize,
    pub loop_threshold: u32,
    /// Base directory for relative tool paths
    pub working_directory: PathBuf,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: 3,
            max_plan_steps: 10,
            loop_window: DEFAULT_WINDOW,
            loop_threshold: DEFAULT_THRESHOLD,
            working_directory: PathBuf::from("."),
        }
    }
}

/// Plans, executes and answers requests.
pub struct PlanOrchestrator {
    manager: Arc<ModelResourceManager>,
    registry: Arc<ToolRegistry>,
    conversations: Arc<dyn ConversationStore>,
    routes: ModelRoutes,
    settings: OrchestratorSettings,
}

impl PlanOrchestrator {
    pub fn new(
        manager: Arc<ModelResourceManager>,
        registry: Arc<ToolRegistry>,
        conversations: Arc<dyn ConversationStore>,
        routes: ModelRoutes,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            manager,
            registry,
            conversations,
            routes,
            settings,
        }
    }

    pub fn routes(&self) -> &ModelRoutes {
        &self.routes
    }

    pub fn conversations(&self) -> &Arc<dyn ConversationStore> {
        &self.conversations
    }

    /// Handle one client request.
    ///
    /// On failure the error is sent as an `error` frame before `[DONE]` and
    /// then returned.
    pub async fn handle_request(
        &self,
        session_id: &str,
        query: &str,
        sink: &dyn TransportSink,
        cancel: &CancellationToken,
    ) -> CoreResult<RequestOutcome> {
        tracing::info!("PlanOrchestrator: handling request for session {}", session_id);
        let result = self.run(session_id, query, sink, cancel).await;

        if let Err(e) = &result {
            tracing::error!("PlanOrchestrator: request failed: {}", e);
            if let Err(send_err) = sink.send(SinkMessage::error(e.to_string())).await {
                tracing::warn!("PlanOrchestrator: could not deliver error frame: {}", send_err);
            }
        }
        if let Err(send_err) = sink.send(SinkMessage::done()).await {
            tracing::warn!("PlanOrchestrator: could not deliver [DONE]: {}", send_err);
        }
        result
    }

    async fn run(
        &self,
        session_id: &str,
        query: &str,
        sink: &dyn TransportSink,
        cancel: &CancellationToken,
    ) -> CoreResult<RequestOutcome> {
        let history = self.conversations.history(session_id).await?;
        self.conversations
            .append(session_id, Message::user(query))
            .await?;
        notify(sink, SinkMessage::ack(ACK_MESSAGE), cancel).await;

        // Planning
        let known_context = previous_answers(&history);
        let plan = generate_plan(
            &self.manager,
            &self.routes.planner,
            &self.registry,
            query,
            &known_context,
            self.settings.max_plan_steps,
        )
        .await?;
        for (idx, step) in plan.steps.iter().enumerate() {
            tracing::info!(
                "PlanOrchestrator: {}. {} ({})",
                idx + 1,
                step.name,
                step.tool.as_deref().unwrap_or("no tool")
            );
        }

        // Executing
        let mut step_results: Vec<StepResult> = Vec::with_capacity(plan.len());
        let mut context = ContextStore::new();
        for (idx, step) in plan.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(CoreError::cancelled("request cancelled before step execution"));
            }
            let index = idx + 1;
            tracing::info!(
                "PlanOrchestrator: executing step {}/{}: {}",
                index,
                plan.len(),
                step.name
            );

            let prompt = step_prompt(step, &step_results);
            let outcome = match step.tool.as_deref() {
                Some(_) => self.run_tool_step(session_id, &prompt, cancel).await,
                None => self.run_plain_step(&prompt).await,
            };

            match outcome {
                Ok(text) => {
                    tracing::info!(
                        "PlanOrchestrator: step {} produced {} chars",
                        index,
                        text.len()
                    );
                    context.insert(ContextStore::key(index, &step.name), text.clone());
                    step_results.push(StepResult {
                        step: step.name.clone(),
                        ok: true,
                        tool: step.tool.clone(),
                        result: text,
                    });
                }
                Err(e @ CoreError::Cancelled(_)) => return Err(e),
                Err(e) => {
                    if e.is_fatal_to_request() {
                        tracing::error!("PlanOrchestrator: step {} lost its backend: {}", index, e);
                    } else {
                        tracing::warn!("PlanOrchestrator: step {} failed: {}", index, e);
                    }
                    step_results.push(StepResult {
                        step: step.name.clone(),
                        ok: false,
                        tool: step.tool.clone(),
                        result: e.to_string(),
                    });
                }
            }
        }

        // Synthesizing
        let aggregated = aggregate_context(&step_results, &context);
        tracing::info!(
            "PlanOrchestrator: aggregated context is {} chars",
            aggregated.len()
        );
        let final_prompt = synthesis_prompt(&aggregated, query);
        let options = AskOptions::default();
        let mut stream = GuardedStream::new(self.settings.loop_window, self.settings.loop_threshold);
        let final_text = stream
            .run(
                vec![Message::user(final_prompt)],
                |messages, tx, token| {
                    let manager = self.manager.clone();
                    let descriptor = self.routes.synthesis.clone();
                    let options = options.clone();
                    async move {
                        manager
                            .ask_stream(&descriptor, &messages, &options, tx, token)
                            .await
                    }
                },
                sink,
                cancel,
            )
            .await?;

        self.conversations
            .append(session_id, Message::assistant(final_text.clone()))
            .await?;
        tracing::info!("PlanOrchestrator: finished request for session {}", session_id);

        Ok(RequestOutcome {
            plan,
            step_results,
            final_text,
        })
    }

    async fn run_plain_step(&self, prompt: &str) -> CoreResult<String> {
        let response = self
            .manager
            .ask(&self.routes.tool, &[Message::user(prompt)], &AskOptions::default())
            .await?;
        Ok(response.content_text().trim().to_string())
    }

    /// Ask the tool model, execute the calls it makes, and repeat until a
    /// round makes no calls or the iteration limit is reached.
    async fn run_tool_step(
        &self,
        session_id: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<String> {
        let definitions = self.registry.definitions();
        let options = AskOptions::with_tools(definitions.clone())
            .system(build_tool_call_instructions(&definitions));
        let ctx = ToolExecutionContext::new(session_id, self.settings.working_directory.clone())
            .with_cancellation(cancel.clone());

        let mut messages = vec![Message::user(prompt)];
        let mut summary = String::new();
        let mut last_text = String::new();

        for round in 1..=self.settings.max_tool_iterations.max(1) {
            let response = self.manager.ask(&self.routes.tool, &messages, &options).await?;
            last_text = response.content_text().trim().to_string();
            let reply = response.text_for_parsing();
            let calls = parse_tool_calls(&reply);
            if calls.is_empty() {
                tracing::debug!("PlanOrchestrator: round {} made no tool calls", round);
                break;
            }
            messages.push(Message::assistant(reply));

            for call in calls {
                if cancel.is_cancelled() {
                    return Err(CoreError::cancelled("request cancelled between tool calls"));
                }
                tracing::info!("PlanOrchestrator: executing tool '{}'", call.name);
                let result = self
                    .registry
                    .execute(&call.name, &ctx, call.arguments_value())
                    .await;
                if !result.success {
                    tracing::warn!(
                        "PlanOrchestrator: tool '{}' failed: {}",
                        call.name,
                        result.to_content()
                    );
                }

                let folded = self.fold_result(result, prompt).await?;
                let section = format_tool_result(&call.name, &folded);
                messages.push(Message::tool(section.clone()));
                if !summary.is_empty() {
                    summary.push_str("\n\n");
                }
                summary.push_str(&section);
            }
        }

        if summary.is_empty() {
            Ok(last_text)
        } else {
            Ok(summary)
        }
    }

    /// Reduce a successful tool output that does not fit one reader chunk.
    async fn fold_result(&self, result: ToolResult, goal: &str) -> CoreResult<ToolResult> {
        if !result.success {
            return Ok(result);
        }
        let Some(output) = result.into_output() else {
            return Ok(ToolResult::ok(""));
        };
        if self.manager.fits_one_chunk(&self.routes.reader, &output).await? {
            return Ok(ToolResult::ok(output));
        }
        tracing::info!(
            "PlanOrchestrator: tool output of {} chars exceeds one chunk, reducing",
            output.len()
        );
        let reduced = self
            .manager
            .ask_chunked(&self.routes.reader, &[Message::user(output)], Some(goal))
            .await?;
        Ok(ToolResult::ok(reduced))
    }
}

/// Send a progress frame; a closed sink cancels the request.
async fn notify(sink: &dyn TransportSink, message: SinkMessage, cancel: &CancellationToken) {
    if let Err(e) = sink.send(message).await {
        tracing::warn!("PlanOrchestrator: sink closed, cancelling request: {}", e);
        cancel.cancel();
    }
}

fn previous_answers(history: &[Message]) -> Vec<(String, String)> {
    let answers: Vec<&Message> = history
        .iter()
        .filter(|m| m.role() == MessageRole::Assistant)
        .collect();
    let skip = answers.len().saturating_sub(PLANNER_HISTORY);
    answers
        .into_iter()
        .enumerate()
        .skip(skip)
        .map(|(idx, m)| (format!("previous_answer_{}", idx + 1), m.content().to_string()))
        .collect()
}

/// The step's prompt followed by the results of earlier steps.
pub fn step_prompt(step: &Step, previous: &[StepResult]) -> String {
    if previous.is_empty() {
        return step.prompt.clone();
    }
    let results = previous
        .iter()
        .map(|r| {
            let status = if r.ok { "ok" } else { "failed" };
            format!("STEP: {} ({})\n{}", r.step, status, r.result)
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "{}\n\nHere are the results of the steps executed so far:\n{}",
        step.prompt, results
    )
}

/// `STEP:` sections for every result, then `CONTEXT` sections for every
/// context entry, joined by [`CONTEXT_SEPARATOR`].
pub fn aggregate_context(results: &[StepResult], context: &ContextStore) -> String {
    results
        .iter()
        .map(|r| format!("STEP: {}\n{}", r.step, r.result))
        .chain(
            context
                .entries()
                .iter()
                .map(|(key, value)| format!("CONTEXT {}:\n{}", key, value)),
        )
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

pub fn synthesis_prompt(aggregated: &str, query: &str) -> String {
    format!(
        "You have already run the following steps:\n\n{}\n\nUse this information to answer the user's question:\n{}",
        aggregated, query
    )
}
