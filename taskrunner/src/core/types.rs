//! Plan and execution data model.
//!
//! These types are the stable contract between the compiler, validator, and
//! engine. They serialize to JSON with `snake_case` fields so adjacent layers
//! can ship them as-is.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::EngineError;

pub type StepId = String;

/// Resolved parameters handed to a tool.
pub type ToolParams = serde_json::Map<String, Value>;

/// Lifecycle of a step: `pending -> running -> completed | failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Running)
                | (StepStatus::Running, StepStatus::Completed)
                | (StepStatus::Running, StepStatus::Failed)
        )
    }
}

/// A parameter value: either a literal or a reference to another step's output.
///
/// References are resolved by the engine at invocation time only. Decoding
/// goes through [`ParamValue::from_raw`], so plan files and model output read
/// references the same way.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    StepOutput {
        from_step: StepId,
        /// Optional top-level key to project out of an object output.
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    Literal(Value),
}

impl<'de> Deserialize<'de> for ParamValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(ParamValue::from_raw)
    }
}

static REFERENCE_TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{\{\s*([A-Za-z0-9_\-]+)(?:\.output(?:\.([A-Za-z0-9_\-]+))?)?\s*\}\}$")
        .expect("reference template regex should be valid")
});

impl ParamValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        ParamValue::Literal(value.into())
    }

    pub fn step_output(step: impl Into<String>) -> Self {
        ParamValue::StepOutput {
            from_step: step.into(),
            field: None,
        }
    }

    /// Interpret a raw JSON value from model output.
    ///
    /// Recognizes `{"from_step": "<id>"}` objects (with optional `field`) and
    /// whole-string templates `{{<id>}}`, `{{<id>.output}}`,
    /// `{{<id>.output.<field>}}`. Anything else is a literal.
    pub fn from_raw(value: Value) -> Self {
        match value {
            Value::Object(ref map) => {
                let from = map.get("from_step").and_then(Value::as_str);
                let field = map.get("field").and_then(Value::as_str);
                let only_ref_keys = map.keys().all(|key| key == "from_step" || key == "field");
                match from {
                    Some(step) if only_ref_keys => ParamValue::StepOutput {
                        from_step: step.to_string(),
                        field: field.map(str::to_string),
                    },
                    _ => ParamValue::Literal(value),
                }
            }
            Value::String(ref text) => match REFERENCE_TEMPLATE_RE.captures(text.trim()) {
                Some(caps) => ParamValue::StepOutput {
                    from_step: caps[1].to_string(),
                    field: caps.get(2).map(|m| m.as_str().to_string()),
                },
                None => ParamValue::Literal(value),
            },
            other => ParamValue::Literal(other),
        }
    }

    pub fn as_literal_str(&self) -> Option<&str> {
        match self {
            ParamValue::Literal(Value::String(text)) => Some(text),
            _ => None,
        }
    }

    pub fn referenced_step(&self) -> Option<&str> {
        match self {
            ParamValue::StepOutput { from_step, .. } => Some(from_step),
            ParamValue::Literal(_) => None,
        }
    }
}

/// Terminal outcome of a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tool invocations made for this step (0 when never invoked).
    #[serde(default)]
    pub attempts: u32,
}

impl StepResult {
    pub fn succeeded(output: Option<Value>, attempts: u32) -> Self {
        Self {
            success: true,
            output,
            error: None,
            attempts,
        }
    }

    pub fn failed(error: impl Into<String>, attempts: u32) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            attempts,
        }
    }
}

/// One tool invocation within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    #[serde(default)]
    pub description: String,
    pub tool: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub dependencies: Vec<StepId>,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
}

impl Step {
    pub fn new(id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            tool: tool.into(),
            parameters: BTreeMap::new(),
            dependencies: Vec::new(),
            status: StepStatus::Pending,
            result: None,
        }
    }

    /// Ids of steps whose output this step's parameters reference.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.parameters.values().filter_map(ParamValue::referenced_step)
    }

    /// Move to `next`, rejecting anything outside the step lifecycle.
    pub fn transition(&mut self, next: StepStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                step: self.id.clone(),
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// A DAG of steps produced from a task description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
    #[serde(default)]
    pub dependency_map: BTreeMap<StepId, Vec<StepId>>,
    /// Model-estimated duration in seconds.
    #[serde(default)]
    pub estimated_time: f64,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        let mut plan = Self {
            steps,
            dependency_map: BTreeMap::new(),
            estimated_time: 0.0,
        };
        plan.rebuild_dependency_map();
        plan
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id == id)
    }

    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|step| step.id.clone()).collect()
    }

    /// Recompute `dependency_map` from per-step dependency lists.
    pub fn rebuild_dependency_map(&mut self) {
        self.dependency_map = self
            .steps
            .iter()
            .map(|step| (step.id.clone(), step.dependencies.clone()))
            .collect();
    }
}

/// A file produced by plan execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub name: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_by: StepId,
}

/// Per-step entry of an aggregated multi-step output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutputSummary {
    pub step: StepId,
    pub description: String,
    pub output: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub total_time_ms: u64,
    /// Steps attempted (retries are not counted).
    pub iterations: u32,
    /// Distinct tools invoked, in first-use order.
    pub tools_used: Vec<String>,
}

/// Structured outcome of executing one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub plan: Plan,
    pub completed_steps: Vec<StepId>,
    pub failed_steps: Vec<StepId>,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub artifacts: Vec<Artifact>,
    pub metadata: ExecutionMetadata,
}

impl ExecutionResult {
    /// Result for a run that never got to execute any step.
    pub fn aborted(plan: Plan, error: impl Into<String>) -> Self {
        Self {
            success: false,
            plan,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            output: Value::Null,
            error: Some(error.into()),
            artifacts: Vec::new(),
            metadata: ExecutionMetadata::default(),
        }
    }
}
