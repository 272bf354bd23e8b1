//! Plan execution.
//!
//! Steps run one at a time in dependency order. A step's tool call is retried
//! up to `max_retries` times; the first step that still fails stops the run.
//! Step failures are reported in the [`ExecutionResult`]; only engine-level
//! problems (cycles, illegal transitions, the iteration budget) are errors.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::core::budget::IterationBudget;
use crate::core::classifier::{artifact_type, file_name, resolved_content, resolved_write_path};
use crate::core::topo::plan_order;
use crate::core::types::{
    Artifact, ExecutionMetadata, ExecutionResult, ParamValue, Plan, Step, StepId,
    StepOutputSummary, StepResult, StepStatus, ToolParams,
};
use crate::core::validator::ToolCatalog;
use crate::error::{EngineError, StepExecutionError};
use crate::io::config::EngineConfig;
use crate::io::fs::Filesystem;
use crate::tools::registry::ToolRegistry;

pub struct ExecutionEngine {
    registry: Arc<ToolRegistry>,
    fs: Arc<dyn Filesystem>,
    config: EngineConfig,
}

/// Bookkeeping for one run.
#[derive(Default)]
struct RunLog {
    completed: Vec<StepId>,
    failed: Vec<StepId>,
    outputs: HashMap<StepId, Value>,
    /// Parameters each completed step was invoked with, for artifact lookup.
    invoked_with: HashMap<StepId, ToolParams>,
    tools_used: Vec<String>,
    error: Option<String>,
}

impl RunLog {
    fn note_tool(&mut self, tool: &str) {
        if !self.tools_used.iter().any(|used| used == tool) {
            self.tools_used.push(tool.to_string());
        }
    }
}

enum StepOutcome {
    Completed {
        output: Option<Value>,
        params: ToolParams,
        attempts: u32,
    },
    Failed {
        error: String,
        attempts: u32,
    },
}

impl ExecutionEngine {
    pub fn new(registry: Arc<ToolRegistry>, fs: Arc<dyn Filesystem>, config: EngineConfig) -> Self {
        Self {
            registry,
            fs,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute a validated plan.
    #[instrument(skip_all, fields(steps = plan.steps.len()))]
    pub async fn execute(&self, mut plan: Plan) -> Result<ExecutionResult, EngineError> {
        let started = Instant::now();
        let order = plan_order(&plan).map_err(|path| EngineError::Cycle { path })?;
        let mut budget = IterationBudget::new(self.config.max_iterations);
        let mut run = RunLog::default();

        for id in order {
            let index = plan
                .position(&id)
                .ok_or_else(|| EngineError::UnknownStep(id.clone()))?;

            if let Err(limit) = budget.charge() {
                warn!(limit, step = %id, "iteration budget exhausted");
                run.error = Some(format!(
                    "iteration budget of {limit} steps exhausted before {id}"
                ));
                let partial = self.finish(plan, run, &budget, started).await;
                return Err(EngineError::BudgetExceeded {
                    limit,
                    partial: Box::new(partial),
                });
            }

            let step = &mut plan.steps[index];
            step.transition(StepStatus::Running)?;
            let span = info_span!("step", step = %step.id, tool = %step.tool);
            let outcome = self.run_step(step, &mut run).instrument(span).await;

            match outcome {
                StepOutcome::Completed {
                    output,
                    params,
                    attempts,
                } => {
                    step.transition(StepStatus::Completed)?;
                    run.outputs
                        .insert(step.id.clone(), output.clone().unwrap_or(Value::Null));
                    run.invoked_with.insert(step.id.clone(), params);
                    run.completed.push(step.id.clone());
                    step.result = Some(StepResult::succeeded(output, attempts));
                }
                StepOutcome::Failed { error, attempts } => {
                    step.transition(StepStatus::Failed)?;
                    warn!(step = %step.id, attempts, error = %error, "step failed, stopping run");
                    run.failed.push(step.id.clone());
                    run.error = Some(format!("step {} failed: {error}", step.id));
                    step.result = Some(StepResult::failed(error, attempts));
                    break;
                }
            }
        }

        Ok(self.finish(plan, run, &budget, started).await)
    }

    async fn run_step(&self, step: &Step, run: &mut RunLog) -> StepOutcome {
        let completed: HashSet<&str> = run.completed.iter().map(String::as_str).collect();
        let missing: Vec<&str> = step
            .dependencies
            .iter()
            .map(String::as_str)
            .filter(|dep| !completed.contains(dep))
            .collect();
        if !missing.is_empty() {
            return StepOutcome::Failed {
                error: format!("unsatisfied dependencies: {}", missing.join(", ")),
                attempts: 0,
            };
        }

        let params = match resolve_params(&step.parameters, &run.outputs) {
            Ok(params) => params,
            Err(error) => return StepOutcome::Failed { error, attempts: 0 },
        };

        run.note_tool(&step.tool);
        let mut last_error = String::new();
        for attempt in 1..=self.config.max_retries {
            match self.registry.execute(&step.tool, &params).await {
                Ok(output) if output.success => {
                    info!(attempt, "step completed");
                    return StepOutcome::Completed {
                        output: output.output,
                        params,
                        attempts: attempt,
                    };
                }
                Ok(output) => {
                    last_error = output
                        .error
                        .unwrap_or_else(|| "tool reported failure".to_string());
                }
                Err(err) => last_error = err.to_string(),
            }
            debug!(attempt, error = %last_error, "step attempt failed");
        }

        StepOutcome::Failed {
            error: StepExecutionError {
                attempts: self.config.max_retries,
                last_error,
            }
            .to_string(),
            attempts: self.config.max_retries,
        }
    }

    async fn finish(
        &self,
        plan: Plan,
        run: RunLog,
        budget: &IterationBudget,
        started: Instant,
    ) -> ExecutionResult {
        let artifacts = self.collect_artifacts(&plan, &run).await;
        let output = aggregate_output(&plan, &run);
        let success = run.failed.is_empty() && run.error.is_none();
        let total_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            success,
            completed = run.completed.len(),
            failed = run.failed.len(),
            artifacts = artifacts.len(),
            total_time_ms,
            "execution finished"
        );

        ExecutionResult {
            success,
            plan,
            completed_steps: run.completed,
            failed_steps: run.failed,
            output,
            error: run.error,
            artifacts,
            metadata: ExecutionMetadata {
                total_time_ms,
                iterations: budget.used(),
                tools_used: run.tools_used,
            },
        }
    }

    async fn collect_artifacts(&self, plan: &Plan, run: &RunLog) -> Vec<Artifact> {
        let mut artifacts = Vec::new();
        for id in &run.completed {
            let Some(step) = plan.step(id) else { continue };
            if !self.registry.writes_file(&step.tool) {
                continue;
            }
            let Some(params) = run.invoked_with.get(id) else {
                continue;
            };
            let Some(path) = resolved_write_path(params) else {
                warn!(step = %id, "file-writing step has no path parameter");
                continue;
            };
            let content = match self.fs.read_file(path).await {
                Ok(content) => content,
                Err(err) => {
                    debug!(
                        step = %id,
                        path,
                        error = %format!("{err:#}"),
                        "falling back to content parameter"
                    );
                    let Some(content) = resolved_content(params) else {
                        warn!(step = %id, path, "artifact unreadable and has no content parameter");
                        continue;
                    };
                    content
                }
            };
            artifacts.push(Artifact {
                path: path.to_string(),
                name: file_name(path).to_string(),
                content,
                kind: artifact_type(path),
                created_by: id.clone(),
            });
        }
        artifacts
    }
}

/// Substitute step-output references with stored outputs.
fn resolve_params(
    parameters: &BTreeMap<String, ParamValue>,
    outputs: &HashMap<StepId, Value>,
) -> Result<ToolParams, String> {
    let mut resolved = ToolParams::new();
    for (name, value) in parameters {
        let value = match value {
            ParamValue::Literal(literal) => literal.clone(),
            ParamValue::StepOutput { from_step, field } => {
                let output = outputs.get(from_step).ok_or_else(|| {
                    format!("parameter '{name}' references step {from_step}, which has not run")
                })?;
                project(output, field.as_deref())
                    .map_err(|reason| format!("parameter '{name}': {reason}"))?
            }
        };
        resolved.insert(name.clone(), value);
    }
    Ok(resolved)
}

/// Pick `field` out of an object output. Non-object outputs are passed whole.
fn project(output: &Value, field: Option<&str>) -> Result<Value, String> {
    match (field, output) {
        (None, _) => Ok(output.clone()),
        (Some(key), Value::Object(map)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| format!("step output has no field '{key}'")),
        (Some(_), other) => Ok(other.clone()),
    }
}

fn aggregate_output(plan: &Plan, run: &RunLog) -> Value {
    match run.completed.as_slice() {
        [] => Value::Null,
        [only] => run.outputs.get(only).cloned().unwrap_or(Value::Null),
        many => {
            let summaries: Vec<StepOutputSummary> = many
                .iter()
                .map(|id| StepOutputSummary {
                    step: id.clone(),
                    description: plan
                        .step(id)
                        .map(|step| step.description.clone())
                        .unwrap_or_default(),
                    output: run.outputs.get(id).cloned().unwrap_or(Value::Null),
                })
                .collect();
            serde_json::to_value(summaries).unwrap_or(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ParamSpec, ParamType};
    use crate::test_support::{
        MemoryFs, ScriptedTool, plan, registry_with, step, with_param, with_ref,
    };
    use crate::tools::builtin::register_builtin_tools;
    use crate::tools::registry::{Tool, ToolDefinition, ToolOutput};
    use serde_json::json;

    fn definition(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, format!("{name} tool"))
    }

    fn engine(tools: Vec<Arc<dyn Tool>>) -> ExecutionEngine {
        engine_with(tools, EngineConfig::default())
    }

    fn engine_with(tools: Vec<Arc<dyn Tool>>, config: EngineConfig) -> ExecutionEngine {
        ExecutionEngine::new(
            Arc::new(registry_with(tools)),
            Arc::new(MemoryFs::default()),
            config,
        )
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let broken = Arc::new(ScriptedTool::raising(definition("broken"), "boom"));
        let fine = Arc::new(ScriptedTool::succeeding(definition("fine"), json!("ok")));
        let engine = engine(vec![broken.clone(), fine.clone()]);

        let result = engine
            .execute(plan(vec![
                step("step_1", "broken", &[]),
                step("step_2", "fine", &[]),
            ]))
            .await
            .expect("execute");

        assert!(!result.success);
        assert_eq!(result.failed_steps, vec!["step_1"]);
        assert!(result.completed_steps.is_empty());
        assert_eq!(fine.calls(), 0);
        assert_eq!(result.plan.steps[1].status, StepStatus::Pending);
        assert_eq!(result.plan.steps[0].status, StepStatus::Failed);
        assert!(result.error.expect("error").contains("step_1"));
    }

    #[tokio::test]
    async fn always_failing_tool_is_invoked_exactly_max_retries_times() {
        let broken = Arc::new(ScriptedTool::new(definition("broken"), Vec::new()).with_fallback(
            Ok(ToolOutput::failed("disk full")),
        ));
        let engine = engine(vec![broken.clone()]);

        let result = engine
            .execute(plan(vec![step("step_1", "broken", &[])]))
            .await
            .expect("execute");

        assert_eq!(broken.calls(), 3);
        let step_result = result.plan.steps[0].result.clone().expect("result");
        assert_eq!(
            step_result.error.as_deref(),
            Some("Failed after 3 attempts: disk full")
        );
        assert_eq!(step_result.attempts, 3);
        assert_eq!(result.metadata.iterations, 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let flaky = Arc::new(ScriptedTool::new(
            definition("flaky"),
            vec![Err("timeout".to_string()), Ok(ToolOutput::ok("second time"))],
        ));
        let engine = engine(vec![flaky.clone()]);

        let result = engine
            .execute(plan(vec![step("step_1", "flaky", &[])]))
            .await
            .expect("execute");

        assert!(result.success);
        assert_eq!(flaky.calls(), 2);
        assert_eq!(result.output, json!("second time"));
        assert_eq!(result.plan.steps[0].result.as_ref().map(|r| r.attempts), Some(2));
    }

    #[tokio::test]
    async fn references_resolve_to_prior_outputs() {
        let producer = Arc::new(ScriptedTool::succeeding(
            definition("produce"),
            json!({"path": "a.txt", "content": "alpha"}),
        ));
        let consumer = Arc::new(ScriptedTool::succeeding(definition("consume"), json!(null)));
        let engine = engine(vec![producer, consumer.clone()]);

        let consume = with_ref(
            with_ref(
                with_param(step("step_2", "consume", &["step_1"]), "mode", "fast"),
                "whole",
                "step_1",
                None,
            ),
            "text",
            "step_1",
            Some("content"),
        );
        let result = engine
            .execute(plan(vec![step("step_1", "produce", &[]), consume]))
            .await
            .expect("execute");

        assert!(result.success);
        let seen = consumer.last_params().expect("params");
        assert_eq!(seen["text"], json!("alpha"));
        assert_eq!(seen["whole"], json!({"path": "a.txt", "content": "alpha"}));
        assert_eq!(seen["mode"], json!("fast"));
    }

    #[tokio::test]
    async fn missing_projected_field_fails_without_invoking() {
        let producer = Arc::new(ScriptedTool::succeeding(definition("produce"), json!({"a": 1})));
        let consumer = Arc::new(ScriptedTool::succeeding(definition("consume"), json!(null)));
        let engine = engine(vec![producer, consumer.clone()]);

        let result = engine
            .execute(plan(vec![
                step("step_1", "produce", &[]),
                with_ref(step("step_2", "consume", &["step_1"]), "x", "step_1", Some("b")),
            ]))
            .await
            .expect("execute");

        assert_eq!(result.failed_steps, vec!["step_2"]);
        assert_eq!(consumer.calls(), 0);
        assert!(result.error.expect("error").contains("no field 'b'"));
    }

    #[tokio::test]
    async fn unsatisfied_dependency_fails_without_retry() {
        let tool = Arc::new(ScriptedTool::succeeding(definition("noop"), json!(null)));
        let engine = engine(vec![tool.clone()]);

        let result = engine
            .execute(plan(vec![step("step_1", "noop", &["ghost"])]))
            .await
            .expect("execute");

        assert_eq!(tool.calls(), 0);
        let step_result = result.plan.steps[0].result.clone().expect("result");
        assert_eq!(step_result.attempts, 0);
        assert!(step_result.error.expect("error").contains("ghost"));
    }

    #[tokio::test]
    async fn runs_dependencies_before_dependents() {
        let tool = Arc::new(ScriptedTool::succeeding(definition("noop"), json!(1)));
        let engine = engine(vec![tool]);

        let result = engine
            .execute(plan(vec![
                step("c", "noop", &["b"]),
                step("b", "noop", &["a"]),
                step("a", "noop", &[]),
            ]))
            .await
            .expect("execute");

        assert_eq!(result.completed_steps, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn cycle_is_an_engine_error() {
        let tool = Arc::new(ScriptedTool::succeeding(definition("noop"), json!(null)));
        let engine = engine(vec![tool]);

        let err = engine
            .execute(plan(vec![step("a", "noop", &["b"]), step("b", "noop", &["a"])]))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Cycle { .. }), "{err}");
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_partial_result() {
        let tool = Arc::new(ScriptedTool::succeeding(definition("noop"), json!("done")));
        let config = EngineConfig {
            max_iterations: 1,
            ..EngineConfig::default()
        };
        let engine = engine_with(vec![tool.clone()], config);

        let err = engine
            .execute(plan(vec![step("a", "noop", &[]), step("b", "noop", &[])]))
            .await
            .unwrap_err();

        let EngineError::BudgetExceeded { limit, partial } = err else {
            panic!("expected budget error, got {err}");
        };
        assert_eq!(limit, 1);
        assert!(!partial.success);
        assert_eq!(partial.completed_steps, vec!["a"]);
        assert_eq!(partial.metadata.iterations, 1);
        assert_eq!(tool.calls(), 1);
    }

    #[tokio::test]
    async fn output_aggregation_by_completed_count() {
        let tool = Arc::new(ScriptedTool::succeeding(definition("noop"), json!({"n": 1})));
        let engine = engine(vec![tool]);

        let single = engine
            .execute(plan(vec![step("a", "noop", &[])]))
            .await
            .expect("execute");
        assert_eq!(single.output, json!({"n": 1}));

        let several = engine
            .execute(plan(vec![step("a", "noop", &[]), step("b", "noop", &["a"])]))
            .await
            .expect("execute");
        assert_eq!(
            several.output,
            json!([
                {"step": "a", "description": "a description", "output": {"n": 1}},
                {"step": "b", "description": "b description", "output": {"n": 1}},
            ])
        );
        assert_eq!(several.metadata.tools_used, vec!["noop"]);
    }

    #[tokio::test]
    async fn collects_artifacts_from_filesystem() {
        let fs = Arc::new(MemoryFs::default());
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, fs.clone()).expect("builtins");
        let engine = ExecutionEngine::new(Arc::new(registry), fs.clone(), EngineConfig::default());

        let write = with_param(
            with_param(step("step_1", "write_file", &[]), "path", "site/index.html"),
            "content",
            "<h1>hi</h1>",
        );
        let result = engine.execute(plan(vec![write])).await.expect("execute");

        assert_eq!(
            result.artifacts,
            vec![Artifact {
                path: "site/index.html".to_string(),
                name: "index.html".to_string(),
                content: "<h1>hi</h1>".to_string(),
                kind: "html".to_string(),
                created_by: "step_1".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn artifact_falls_back_to_content_parameter() {
        let writer = Arc::new(ScriptedTool::succeeding(
            ToolDefinition::new("remote_write", "Write somewhere else")
                .param("path", ParamSpec::required(ParamType::String))
                .writes_file(),
            json!(null),
        ));
        let engine = engine(vec![writer]);

        let write = with_param(
            with_param(step("step_1", "remote_write", &[]), "path", "notes.md"),
            "content",
            "# Notes",
        );
        let result = engine.execute(plan(vec![write])).await.expect("execute");

        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].content, "# Notes");
        assert_eq!(result.artifacts[0].kind, "markdown");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shared_registry_counts_concurrent_runs() {
        const RUNS: usize = 8;
        let tool = Arc::new(ScriptedTool::succeeding(definition("noop"), json!(1)));
        let engine = Arc::new(engine(vec![tool.clone()]));

        let mut runs = tokio::task::JoinSet::new();
        for run in 0..RUNS {
            let engine = engine.clone();
            runs.spawn(async move {
                let plan = plan(vec![
                    with_param(step("a", "noop", &[]), "run", run),
                    step("b", "noop", &["a"]),
                    step("c", "noop", &["b"]),
                ]);
                engine.execute(plan).await.expect("execute")
            });
        }
        while let Some(joined) = runs.join_next().await {
            let result = joined.expect("run task");
            assert!(result.success);
            assert_eq!(result.completed_steps, vec!["a", "b", "c"]);
        }

        let stats = engine.registry().stats("noop").expect("stats");
        assert_eq!(stats.invocations, (RUNS * 3) as u64);
        assert_eq!(stats.successes, (RUNS * 3) as u64);
        assert_eq!(tool.calls(), (RUNS * 3) as u32);
        let mut tagged: Vec<u64> = tool
            .all_params()
            .iter()
            .filter_map(|params| params.get("run").and_then(Value::as_u64))
            .collect();
        tagged.sort_unstable();
        assert_eq!(tagged, (0..RUNS as u64).collect::<Vec<_>>());
    }
}
