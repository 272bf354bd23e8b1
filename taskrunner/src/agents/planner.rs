//! Plan compilation: task text to a validated [`Plan`].
//!
//! Each attempt renders the planner prompt, asks a model for a plan, repairs
//! and parses the reply, then runs it through the validator. A rejected
//! attempt feeds its error into the next prompt and is reported to the
//! selector so later attempts can escalate.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::agents::selector::{AdaptiveModelSelector, GenerateOptions};
use crate::core::raw_plan::plan_from_value;
use crate::core::repair::parse_model_json;
use crate::core::selector::{ProviderTier, TaskClass};
use crate::core::types::Plan;
use crate::core::validator::validate_plan;
use crate::error::PlanError;
use crate::io::completion::{CompletionOptions, TextCompletion};
use crate::io::config::PlannerConfig;
use crate::io::prompt::{PlannerPromptInputs, PromptBuilder};
use crate::tools::registry::ToolRegistry;

const QUALITY_PASS: f64 = 100.0;
const QUALITY_FAIL: f64 = 0.0;

/// Where plan text comes from.
#[derive(Clone)]
pub enum PlanSource {
    /// Tiered providers with escalation and quality feedback.
    Adaptive(Arc<AdaptiveModelSelector>),
    /// A single provider, no escalation.
    Fixed(Arc<dyn TextCompletion>),
}

pub struct PlanCompiler {
    source: PlanSource,
    config: PlannerConfig,
}

impl PlanCompiler {
    pub fn new(source: PlanSource, config: PlannerConfig) -> Self {
        Self { source, config }
    }

    /// Compile `task` into a plan whose tools all exist in `registry`.
    #[instrument(skip_all, fields(task_bytes = task.len()))]
    pub async fn compile(&self, task: &str, registry: &ToolRegistry) -> Result<Plan, PlanError> {
        let builder = PromptBuilder::new(self.config.prompt_budget_bytes);
        let mut feedback: Option<String> = None;
        let mut last_error = PlanError::Completion("no attempts were made".to_string());

        for attempt in 1..=self.config.max_attempts {
            let inputs = PlannerPromptInputs::new(task, registry.definitions(), feedback.take());
            let prompt = builder
                .build_planner(&inputs)
                .map_err(|err| PlanError::Prompt(format!("{err:#}")))?;

            let (text, tier) = match self.generate(prompt.as_str()).await {
                Ok(generated) => generated,
                Err(err) => {
                    warn!(attempt, error = %err, "plan generation failed");
                    last_error = err;
                    continue;
                }
            };

            match parse_and_validate(&text, registry) {
                Ok(plan) => {
                    self.report(tier, true);
                    info!(attempt, steps = plan.steps.len(), "plan compiled");
                    return Ok(plan);
                }
                Err(err) => {
                    self.report(tier, false);
                    warn!(attempt, error = %err, "plan rejected");
                    feedback = Some(err.to_string());
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }

    async fn generate(&self, prompt: &str) -> Result<(String, Option<ProviderTier>), PlanError> {
        let completion = CompletionOptions {
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        match &self.source {
            PlanSource::Adaptive(selector) => {
                let options = GenerateOptions {
                    completion,
                    force_premium: false,
                };
                let generation = selector
                    .generate(prompt, TaskClass::Planning, &options)
                    .await
                    .map_err(|err| PlanError::Completion(err.to_string()))?;
                Ok((generation.text, Some(generation.tier)))
            }
            PlanSource::Fixed(provider) => {
                let reply = provider
                    .generate(prompt, &completion)
                    .await
                    .map_err(|err| PlanError::Completion(format!("{err:#}")))?;
                Ok((reply.text, None))
            }
        }
    }

    fn report(&self, tier: Option<ProviderTier>, passed: bool) {
        if let (PlanSource::Adaptive(selector), Some(tier)) = (&self.source, tier) {
            let quality = if passed { QUALITY_PASS } else { QUALITY_FAIL };
            selector.report_outcome(tier, quality, passed);
        }
    }
}

fn parse_and_validate(text: &str, registry: &ToolRegistry) -> Result<Plan, PlanError> {
    let value = parse_model_json(text)?;
    let plan = plan_from_value(value)?;
    validate_plan(plan, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::selector::ProviderSet;
    use crate::io::config::SelectorConfig;
    use crate::test_support::{MemoryFs, ScriptedCompletion};
    use crate::tools::builtin::register_builtin_tools;

    const GOOD_PLAN: &str = r#"```json
{"steps": [
  {"id": "step_1", "description": "Write page", "tool": "write_file",
   "parameters": {"path": "index.html", "content": "<h1>Hi</h1>"}},
  {"id": "step_2", "description": "Read it", "tool": "read_file",
   "parameters": {"path": "index.html"}, "dependencies": ["index.html"]},
],
"estimated_time": 10}
```"#;

    const UNKNOWN_TOOL_PLAN: &str =
        r#"{"steps": [{"id": "step_1", "tool": "deploy", "parameters": {}}]}"#;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, Arc::new(MemoryFs::default())).expect("builtins");
        registry
    }

    fn fixed(replies: &[&str]) -> (Arc<ScriptedCompletion>, PlanCompiler) {
        let provider = Arc::new(ScriptedCompletion::replying("model", replies));
        let compiler = PlanCompiler::new(
            PlanSource::Fixed(provider.clone()),
            PlannerConfig::default(),
        );
        (provider, compiler)
    }

    #[tokio::test]
    async fn compiles_repaired_and_corrected_plan() {
        let (_, compiler) = fixed(&[GOOD_PLAN]);
        let plan = compiler
            .compile("make a page", &registry())
            .await
            .expect("compile");

        assert_eq!(plan.step_ids(), vec!["step_1", "step_2"]);
        assert_eq!(plan.steps[1].dependencies, vec!["step_1"]);
        assert_eq!(plan.estimated_time, 10.0);
    }

    #[tokio::test]
    async fn prompt_embeds_task_and_tools() {
        let (provider, compiler) = fixed(&[GOOD_PLAN]);
        compiler
            .compile("make a landing page", &registry())
            .await
            .expect("compile");
        let prompt = &provider.prompts()[0];
        assert!(prompt.contains("make a landing page"));
        assert!(prompt.contains("`write_file`"));
        assert!(prompt.contains("`read_file`"));
    }

    #[tokio::test]
    async fn retries_with_feedback_after_rejection() {
        let (provider, compiler) = fixed(&["no idea", UNKNOWN_TOOL_PLAN, GOOD_PLAN]);
        let plan = compiler
            .compile("make a page", &registry())
            .await
            .expect("third attempt succeeds");

        assert_eq!(plan.steps.len(), 2);
        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(!prompts[0].contains("Previous Attempt Rejected"));
        assert!(prompts[1].contains("no JSON object found"));
        assert!(prompts[2].contains("unknown tool 'deploy'"));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_with_last_error() {
        let (provider, compiler) = fixed(&[UNKNOWN_TOOL_PLAN; 3]);
        let err = compiler
            .compile("deploy it", &registry())
            .await
            .unwrap_err();

        assert!(matches!(err, PlanError::Validation(_)), "{err}");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn transport_failures_are_retried() {
        let provider = Arc::new(ScriptedCompletion::new(
            "model",
            vec![Err("connection reset".to_string()), Ok(GOOD_PLAN.to_string())],
        ));
        let compiler = PlanCompiler::new(PlanSource::Fixed(provider), PlannerConfig::default());
        let plan = compiler.compile("x", &registry()).await.expect("compile");
        assert_eq!(plan.steps.len(), 2);
    }

    #[tokio::test]
    async fn rejected_plans_escalate_to_premium() {
        let fast = Arc::new(ScriptedCompletion::replying(
            "fast",
            &[UNKNOWN_TOOL_PLAN, UNKNOWN_TOOL_PLAN],
        ));
        let standard = Arc::new(ScriptedCompletion::replying("standard", &[]));
        let premium = Arc::new(ScriptedCompletion::replying("premium", &[GOOD_PLAN]));
        let selector = Arc::new(AdaptiveModelSelector::new(
            ProviderSet {
                fast: fast.clone(),
                standard: standard.clone(),
                premium: premium.clone(),
            },
            SelectorConfig::default(),
        ));
        let compiler = PlanCompiler::new(
            PlanSource::Adaptive(selector.clone()),
            PlannerConfig::default(),
        );

        let plan = compiler.compile("x", &registry()).await.expect("compile");

        assert_eq!(plan.steps.len(), 2);
        assert_eq!((fast.calls(), standard.calls(), premium.calls()), (2, 0, 1));
        assert_eq!(selector.consecutive_failures(), 0);
        let scores: Vec<Option<f64>> = selector
            .metrics()
            .iter()
            .map(|metric| metric.quality_score)
            .collect();
        assert_eq!(scores, vec![Some(0.0), Some(0.0), Some(100.0)]);
    }
}
