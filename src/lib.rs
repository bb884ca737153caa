//! Inference Orchestrator
//!
//! Turns a natural-language request into a plan, executes the plan's steps
//! against locally hosted models and tools, and streams a synthesized answer
//! back to the client. It includes:
//! - Configuration and logging bootstrap
//! - The planner and the step-executing `PlanOrchestrator`
//! - The loop guard applied to the final answer stream
//! - Runtime assembly for the embedded and server backends

pub mod config;
pub mod logging;
pub mod loop_guard;
pub mod orchestrator;
pub mod planner;
pub mod runtime;

pub use config::{Backend, ModelAssignments, OrchestratorConfig, ServerSettings};
pub use loop_guard::{GuardedStream, LoopGuard, StreamState, NO_REPEAT_INSTRUCTION};
pub use orchestrator::{
    aggregate_context, ContextStore, ModelRoutes, OrchestratorSettings, PlanOrchestrator,
    RequestOutcome, StepResult, ACK_MESSAGE,
};
pub use planner::{Plan, Step, ANSWER_QUERY_STEP};
pub use runtime::Runtime;

pub use orchestrator_core::{CoreError, CoreResult};
