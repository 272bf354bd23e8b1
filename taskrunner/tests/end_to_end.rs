//! End-to-end: task text through plan compilation to executed artifacts.

use std::sync::Arc;

use taskrunner::agent::TaskAgent;
use taskrunner::agents::planner::{PlanCompiler, PlanSource};
use taskrunner::agents::selector::{AdaptiveModelSelector, ProviderSet};
use taskrunner::core::selector::ProviderTier;
use taskrunner::engine::ExecutionEngine;
use taskrunner::io::config::{EngineConfig, PlannerConfig, SelectorConfig};
use taskrunner::test_support::{MemoryFs, ScriptedCompletion};
use taskrunner::tools::builtin::register_builtin_tools;
use taskrunner::tools::registry::ToolRegistry;

const TWO_FILE_PLAN: &str = r#"Here is the plan:
```json
{
  "steps": [
    {
      "id": "step_1",
      "description": "Write the greeting",
      "tool": "write_file",
      "parameters": {"path": "a.txt", "content": "hello"}
    },
    {
      "id": "step_2",
      "description": "Copy the greeting",
      "tool": "write_file",
      "parameters": {
        "path": "b.txt",
        "content": {"from_step": "step_1", "field": "content"}
      },
      "dependencies": ["a.txt"]
    }
  ]
}
```"#;

fn agent_with(source: PlanSource, fs: Arc<MemoryFs>) -> TaskAgent {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, fs.clone()).expect("builtins");
    let engine = ExecutionEngine::new(Arc::new(registry), fs, EngineConfig::default());
    TaskAgent::new(PlanCompiler::new(source, PlannerConfig::default()), engine)
}

#[tokio::test]
async fn two_file_task_produces_two_artifacts() {
    let fs = Arc::new(MemoryFs::default());
    let provider = Arc::new(ScriptedCompletion::replying("model", &[TWO_FILE_PLAN]));
    let agent = agent_with(PlanSource::Fixed(provider), fs.clone());

    let result = agent
        .execute("write hello to a.txt, then copy it to b.txt")
        .await
        .expect("execute");

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.completed_steps, vec!["step_1", "step_2"]);
    assert!(result.failed_steps.is_empty());
    assert_eq!(result.plan.steps[1].dependencies, vec!["step_1"]);
    assert_eq!(fs.get("b.txt").as_deref(), Some("hello"));

    let artifacts: Vec<(&str, &str, &str)> = result
        .artifacts
        .iter()
        .map(|a| (a.path.as_str(), a.content.as_str(), a.created_by.as_str()))
        .collect();
    assert_eq!(
        artifacts,
        vec![("a.txt", "hello", "step_1"), ("b.txt", "hello", "step_2")]
    );
    assert_eq!(result.metadata.iterations, 2);
    assert_eq!(result.metadata.tools_used, vec!["write_file"]);
    assert_eq!(agent.registry().stats("write_file").map(|s| s.successes), Some(2));
}

#[tokio::test]
async fn adaptive_compilation_escalates_after_rejections() {
    let fs = Arc::new(MemoryFs::default());
    let fast = Arc::new(ScriptedCompletion::replying(
        "fast",
        &["I cannot help", r#"{"steps": []}"#],
    ));
    let standard = Arc::new(ScriptedCompletion::replying("standard", &[]));
    let premium = Arc::new(ScriptedCompletion::replying("premium", &[TWO_FILE_PLAN]));
    let selector = Arc::new(AdaptiveModelSelector::new(
        ProviderSet {
            fast: fast.clone(),
            standard,
            premium: premium.clone(),
        },
        SelectorConfig::default(),
    ));
    let agent = agent_with(PlanSource::Adaptive(selector.clone()), fs);

    let result = agent.execute("two files").await.expect("execute");

    assert!(result.success);
    assert_eq!((fast.calls(), premium.calls()), (2, 1));
    let summary = selector.tier_summary();
    assert_eq!(summary[&ProviderTier::Premium].calls, 1);
    assert_eq!(summary[&ProviderTier::Fast].failures, 2);
}
