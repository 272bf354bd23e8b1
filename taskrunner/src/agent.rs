//! Top-level task agent: compile a task into a plan, then run it.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::agents::planner::{PlanCompiler, PlanSource};
use crate::agents::selector::{AdaptiveModelSelector, ProviderSet};
use crate::core::selector::ProviderTier;
use crate::core::types::{ExecutionResult, Plan};
use crate::core::validator::validate_plan;
use crate::engine::ExecutionEngine;
use crate::error::{EngineError, PlanError};
use crate::io::completion::{CommandCompletion, TextCompletion};
use crate::io::config::Config;
use crate::io::fs::{Filesystem, LocalFs};
use crate::tools::builtin::register_builtin_tools;
use crate::tools::registry::ToolRegistry;

pub struct TaskAgent {
    compiler: PlanCompiler,
    engine: ExecutionEngine,
    selector: Option<Arc<AdaptiveModelSelector>>,
}

impl TaskAgent {
    pub fn new(compiler: PlanCompiler, engine: ExecutionEngine) -> Self {
        Self {
            compiler,
            engine,
            selector: None,
        }
    }

    /// Agent over `workspace` with the built-in tools and the configured
    /// command providers behind an adaptive selector.
    pub fn from_config(cfg: &Config, workspace: &Path) -> Result<Self> {
        cfg.validate().context("validate config")?;

        let fs: Arc<dyn Filesystem> = Arc::new(LocalFs::new(workspace));
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, fs.clone()).context("register built-in tools")?;

        let providers = ProviderSet {
            fast: command_provider(cfg, ProviderTier::Fast)?,
            standard: command_provider(cfg, ProviderTier::Standard)?,
            premium: command_provider(cfg, ProviderTier::Premium)?,
        };
        let selector = Arc::new(AdaptiveModelSelector::new(providers, cfg.selector));
        let compiler = PlanCompiler::new(PlanSource::Adaptive(selector.clone()), cfg.planner);
        let engine = ExecutionEngine::new(Arc::new(registry), fs, cfg.engine);

        Ok(Self {
            compiler,
            engine,
            selector: Some(selector),
        })
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.engine.registry()
    }

    pub fn selector(&self) -> Option<&Arc<AdaptiveModelSelector>> {
        self.selector.as_ref()
    }

    pub async fn generate_plan(&self, task: &str) -> Result<Plan, PlanError> {
        self.compiler.compile(task, self.registry()).await
    }

    /// Validate an externally supplied plan against this agent's tools.
    pub fn validate(&self, plan: Plan) -> Result<Plan, PlanError> {
        validate_plan(plan, self.registry())
    }

    /// Compile and execute `task`.
    #[instrument(skip_all, fields(task_bytes = task.len()))]
    pub async fn execute(&self, task: &str) -> Result<ExecutionResult, PlanError> {
        let plan = self.generate_plan(task).await?;
        info!(steps = plan.steps.len(), "executing compiled plan");
        Ok(self.execute_plan(plan).await)
    }

    /// Execute a validated plan, folding engine errors into a failed result.
    pub async fn execute_plan(&self, plan: Plan) -> ExecutionResult {
        let fallback = plan.clone();
        match self.engine.execute(plan).await {
            Ok(result) => result,
            Err(EngineError::BudgetExceeded { limit, partial }) => {
                warn!(limit, "execution stopped by iteration budget");
                let mut result = *partial;
                result.success = false;
                if result.error.is_none() {
                    result.error = Some(format!("iteration budget of {limit} steps exhausted"));
                }
                result
            }
            Err(err) => {
                warn!(error = %err, "execution aborted");
                ExecutionResult::aborted(fallback, err.to_string())
            }
        }
    }
}

fn command_provider(cfg: &Config, tier: ProviderTier) -> Result<Arc<dyn TextCompletion>> {
    let provider = cfg.providers.tier(tier);
    let completion = CommandCompletion::new(
        tier.to_string(),
        &provider.command,
        provider.timeout(),
        provider.output_limit_bytes,
    )
    .with_context(|| format!("configure {tier} provider"))?;
    Ok(Arc::new(completion))
}
