//! Tool registration, call validation, and invocation statistics.
//!
//! The registry is the only path from a plan step to a side effect. Every
//! call is validated against the tool's declared parameter schema before the
//! tool runs, and every invocation is counted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::schema::{
    ParamSpec, apply_defaults, check_params, unknown_params, validate_spec,
};
use crate::core::types::ToolParams;
use crate::core::validator::ToolCatalog;
use crate::error::RegistryError;

/// Declared surface of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamSpec>,
    /// Set for tools whose effect is writing the file named by a path
    /// parameter. Drives dependency correction and artifact collection.
    #[serde(default)]
    pub writes_file: bool,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
            writes_file: false,
        }
    }

    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    pub fn writes_file(mut self) -> Self {
        self.writes_file = true;
        self
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !is_valid_tool_name(&self.name) {
            problems.push(format!(
                "name '{}' must be non-empty lowercase letters, digits, or underscores",
                self.name
            ));
        }
        if self.description.trim().is_empty() {
            problems.push("description must not be empty".to_string());
        }
        for (name, spec) in &self.parameters {
            problems.extend(validate_spec(name, spec));
        }
        problems
    }
}

fn is_valid_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// What a tool reports back for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(output: impl Into<Value>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// A named capability the engine can invoke.
///
/// Implementations receive parameters that already passed schema checks,
/// with declared defaults filled in. A returned `Err` and an
/// `Ok(ToolOutput { success: false, .. })` are both call failures.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;
    async fn invoke(&self, params: &ToolParams) -> anyhow::Result<ToolOutput>;
}

#[derive(Debug, Default)]
struct ToolStats {
    invocations: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl ToolStats {
    fn record(&self, success: bool, duration_ms: u64) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ToolStatsSnapshot {
        let invocations = self.invocations.load(Ordering::Relaxed);
        let total_duration_ms = self.total_duration_ms.load(Ordering::Relaxed);
        ToolStatsSnapshot {
            invocations,
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            total_duration_ms,
            average_duration_ms: if invocations == 0 {
                0.0
            } else {
                total_duration_ms as f64 / invocations as f64
            },
        }
    }
}

/// Point-in-time copy of a tool's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolStatsSnapshot {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
    pub average_duration_ms: f64,
}

struct Registered {
    tool: Arc<dyn Tool>,
    stats: ToolStats,
}

/// Name-keyed set of tools.
///
/// Registration takes `&mut self` and happens before any plan runs;
/// execution only needs `&self`, so the registry can be shared behind an
/// `Arc` while counters update concurrently.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Registered>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. Names are unique and definitions must be well formed.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let definition = tool.definition();
        let name = definition.name.clone();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        let reasons = definition.problems();
        if !reasons.is_empty() {
            return Err(RegistryError::InvalidDefinition {
                tool: name,
                reasons,
            });
        }
        debug!(tool = %name, params = definition.parameters.len(), "registered tool");
        self.tools.insert(
            name,
            Registered {
                tool,
                stats: ToolStats::default(),
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|entry| entry.tool.definition())
    }

    /// All definitions, sorted by name.
    pub fn definitions(&self) -> Vec<&ToolDefinition> {
        self.tools
            .values()
            .map(|entry| entry.tool.definition())
            .collect()
    }

    /// Apply defaults and check `params` against the tool's schema.
    ///
    /// Returns the parameters the tool would receive.
    pub fn validate_call(
        &self,
        name: &str,
        params: &ToolParams,
    ) -> Result<ToolParams, RegistryError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))?;
        let schema = &entry.tool.definition().parameters;

        let mut prepared = params.clone();
        apply_defaults(schema, &mut prepared);
        let reasons = check_params(schema, &prepared);
        if !reasons.is_empty() {
            return Err(RegistryError::InvalidParameters {
                tool: name.to_string(),
                reasons,
            });
        }
        let extra = unknown_params(schema, &prepared);
        if !extra.is_empty() {
            debug!(tool = %name, unknown = ?extra, "ignoring undeclared parameters");
        }
        Ok(prepared)
    }

    /// Validate and invoke one tool call, recording statistics.
    ///
    /// Validation failures are not counted as invocations; the tool never ran.
    #[instrument(skip(self, params))]
    pub async fn execute(
        &self,
        name: &str,
        params: &ToolParams,
    ) -> Result<ToolOutput, RegistryError> {
        let prepared = self.validate_call(name, params)?;
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))?;

        let started = Instant::now();
        let outcome = entry.tool.invoke(&prepared).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(output) => {
                entry.stats.record(output.success, duration_ms);
                if !output.success {
                    debug!(error = ?output.error, "tool reported failure");
                }
                Ok(output)
            }
            Err(err) => {
                entry.stats.record(false, duration_ms);
                warn!(error = %format!("{err:#}"), "tool raised");
                Err(RegistryError::ToolFailed {
                    tool: name.to_string(),
                    message: format!("{err:#}"),
                })
            }
        }
    }

    pub fn stats(&self, name: &str) -> Option<ToolStatsSnapshot> {
        self.tools.get(name).map(|entry| entry.stats.snapshot())
    }

    pub fn all_stats(&self) -> BTreeMap<String, ToolStatsSnapshot> {
        self.tools
            .iter()
            .map(|(name, entry)| (name.clone(), entry.stats.snapshot()))
            .collect()
    }
}

impl ToolCatalog for ToolRegistry {
    fn has_tool(&self, name: &str) -> bool {
        self.contains(name)
    }

    fn writes_file(&self, name: &str) -> bool {
        self.definition(name)
            .is_some_and(|definition| definition.writes_file)
    }
}
