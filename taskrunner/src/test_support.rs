//! Test-only builders and scripted collaborators.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;

use crate::core::types::{ParamValue, Plan, Step, ToolParams};
use crate::core::validator::ToolCatalog;
use crate::io::completion::{Completion, CompletionOptions, TextCompletion};
use crate::io::fs::Filesystem;
use crate::tools::registry::{Tool, ToolDefinition, ToolOutput, ToolRegistry};

/// A pending step with the given dependencies and no parameters.
pub fn step(id: &str, tool: &str, deps: &[&str]) -> Step {
    let mut step = Step::new(id, tool);
    step.description = format!("{id} description");
    step.dependencies = deps.iter().map(|dep| dep.to_string()).collect();
    step
}

/// Add a literal parameter.
pub fn with_param(mut step: Step, key: &str, value: impl Into<Value>) -> Step {
    step.parameters
        .insert(key.to_string(), ParamValue::literal(value));
    step
}

/// Add a step-output reference parameter.
pub fn with_ref(mut step: Step, key: &str, from_step: &str, field: Option<&str>) -> Step {
    step.parameters.insert(
        key.to_string(),
        ParamValue::StepOutput {
            from_step: from_step.to_string(),
            field: field.map(str::to_string),
        },
    );
    step
}

pub fn plan(steps: Vec<Step>) -> Plan {
    Plan::new(steps)
}

/// Tool parameters from a JSON object literal.
pub fn params(value: Value) -> ToolParams {
    match value {
        Value::Object(map) => map,
        other => panic!("params must be a JSON object, got {other}"),
    }
}

/// Catalog of tool names with their file-writing flag.
pub struct StaticCatalog {
    tools: HashMap<String, bool>,
}

impl StaticCatalog {
    pub fn new(tools: &[(&str, bool)]) -> Self {
        Self {
            tools: tools
                .iter()
                .map(|(name, writes)| (name.to_string(), *writes))
                .collect(),
        }
    }
}

impl ToolCatalog for StaticCatalog {
    fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    fn writes_file(&self, name: &str) -> bool {
        self.tools.get(name).copied().unwrap_or(false)
    }
}

/// One scripted tool call outcome; `Err` makes the tool raise.
pub type ScriptedOutcome = std::result::Result<ToolOutput, String>;

/// Tool that replays queued outcomes, then repeats its fallback.
pub struct ScriptedTool {
    definition: ToolDefinition,
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
    fallback: Option<ScriptedOutcome>,
    calls: AtomicU32,
    seen: Mutex<Vec<ToolParams>>,
}

impl ScriptedTool {
    pub fn new(definition: ToolDefinition, outcomes: Vec<ScriptedOutcome>) -> Self {
        Self {
            definition,
            outcomes: Mutex::new(outcomes.into()),
            fallback: None,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always succeeds with `output`.
    pub fn succeeding(definition: ToolDefinition, output: Value) -> Self {
        Self::new(definition, Vec::new()).with_fallback(Ok(ToolOutput::ok(output)))
    }

    /// Always raises `message`.
    pub fn raising(definition: ToolDefinition, message: &str) -> Self {
        Self::new(definition, Vec::new()).with_fallback(Err(message.to_string()))
    }

    pub fn with_fallback(mut self, outcome: ScriptedOutcome) -> Self {
        self.fallback = Some(outcome);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<ToolParams> {
        self.seen.lock().expect("seen lock").last().cloned()
    }

    pub fn all_params(&self) -> Vec<ToolParams> {
        self.seen.lock().expect("seen lock").clone()
    }
}

#[async_trait]
impl Tool for ScriptedTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn invoke(&self, params: &ToolParams) -> Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().expect("seen lock").push(params.clone());
        let next = self.outcomes.lock().expect("outcomes lock").pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted outcome left for {}", self.definition.name)),
        }
    }
}

/// Completion provider that replays queued replies and records prompts.
pub struct ScriptedCompletion {
    name: String,
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new(name: &str, replies: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            name: name.to_string(),
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Provider whose every reply succeeds, in order.
    pub fn replying(name: &str, replies: &[&str]) -> Self {
        Self::new(
            name,
            replies.iter().map(|reply| Ok(reply.to_string())).collect(),
        )
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl TextCompletion for ScriptedCompletion {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, _options: &CompletionOptions) -> Result<Completion> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        match self.replies.lock().expect("replies lock").pop_front() {
            Some(Ok(text)) => Ok(Completion::text(text)),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("{} has no scripted reply left", self.name)),
        }
    }
}

/// In-memory workspace.
#[derive(Default)]
pub struct MemoryFs {
    files: Mutex<BTreeMap<String, String>>,
}

impl MemoryFs {
    pub fn get(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .expect("files lock")
            .get(normalize(path))
            .cloned()
    }

    pub fn insert(&self, path: &str, content: &str) {
        self.files
            .lock()
            .expect("files lock")
            .insert(normalize(path).to_string(), content.to_string());
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().expect("files lock").keys().cloned().collect()
    }
}

fn normalize(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

#[async_trait]
impl Filesystem for MemoryFs {
    async fn read_file(&self, path: &str) -> Result<String> {
        self.get(path)
            .ok_or_else(|| anyhow!("no such file: {path}"))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.insert(path, content);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.get(path).is_some())
    }
}

/// Registry holding the given tools.
pub fn registry_with(tools: Vec<Arc<dyn Tool>>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool).expect("register scripted tool");
    }
    registry
}

/// Temporary workspace directory for CLI and filesystem tests.
#[cfg(feature = "test-support")]
pub struct TestWorkspace {
    dir: tempfile::TempDir,
}

#[cfg(feature = "test-support")]
impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    pub fn join(&self, relative: &str) -> std::path::PathBuf {
        self.dir.path().join(relative)
    }

    pub fn write(&self, relative: &str, contents: &str) -> std::path::PathBuf {
        let path = self.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(&path, contents).expect("write workspace file");
        path
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.join(relative)).expect("read workspace file")
    }
}

#[cfg(feature = "test-support")]
impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
