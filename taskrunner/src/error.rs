//! Error taxonomy for planning and execution.
//!
//! Plan errors abort compilation (there is no partial plan). Step failures are
//! contained in [`crate::core::types::ExecutionResult`]; only engine-level
//! invariant violations surface as [`EngineError`].

use crate::core::types::ExecutionResult;

/// Failure to produce a structurally sound plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Model output is not recoverable as structured data.
    #[error("plan parse error: {0}")]
    Parse(String),

    /// Well-formed but semantically invalid (unknown tool, unresolved
    /// dependency, cycle, empty plan).
    #[error("plan validation error: {0}")]
    Validation(String),

    /// The completion collaborator failed on every attempt.
    #[error("plan generation failed: {0}")]
    Completion(String),

    #[error("prompt rendering failed: {0}")]
    Prompt(String),
}

impl PlanError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }
}

/// A step's tool call failed on every attempt.
///
/// Never thrown out of the engine; its message becomes the step's error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed after {attempts} attempts: {last_error}")]
pub struct StepExecutionError {
    pub attempts: u32,
    pub last_error: String,
}

/// Engine-level failures that terminate a run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// More steps were attempted than `max_iterations` allows.
    #[error("iteration budget exceeded: more than {limit} steps attempted")]
    BudgetExceeded {
        limit: u32,
        /// Result accumulated up to the point the budget ran out.
        partial: Box<ExecutionResult>,
    },

    #[error("circular dependency detected at execution time: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("step {step}: illegal status transition {from} -> {to}")]
    InvalidTransition {
        step: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("execution order references unknown step {0}")]
    UnknownStep(String),
}

/// Registration and invocation errors from the tool registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    Duplicate(String),

    #[error("invalid definition for tool {tool}: {}", reasons.join("; "))]
    InvalidDefinition { tool: String, reasons: Vec<String> },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid parameters for {tool}: {}", reasons.join("; "))]
    InvalidParameters { tool: String, reasons: Vec<String> },

    #[error("tool {tool} failed: {message}")]
    ToolFailed { tool: String, message: String },
}

/// The adaptive selector ran out of attempts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("all {attempts} generation attempts failed: {}", errors.join("; "))]
    Exhausted { attempts: u32, errors: Vec<String> },
}
