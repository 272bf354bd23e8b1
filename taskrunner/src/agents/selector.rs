//! Adaptive completion-provider selection with escalation.
//!
//! Owns the three provider tiers, the rolling metrics log, and the
//! consecutive-failure counter. The tier decision itself is the pure
//! [`choose_tier`]; this type feeds it state and drives the retry loop.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::selector::{ProviderMetric, ProviderTier, TaskClass, choose_tier};
use crate::error::SelectorError;
use crate::io::completion::{CompletionOptions, TextCompletion};
use crate::io::config::SelectorConfig;

/// One completion backend per tier.
#[derive(Clone)]
pub struct ProviderSet {
    pub fast: Arc<dyn TextCompletion>,
    pub standard: Arc<dyn TextCompletion>,
    pub premium: Arc<dyn TextCompletion>,
}

impl ProviderSet {
    /// The same backend for every tier.
    pub fn uniform(provider: Arc<dyn TextCompletion>) -> Self {
        Self {
            fast: provider.clone(),
            standard: provider.clone(),
            premium: provider,
        }
    }

    pub fn get(&self, tier: ProviderTier) -> &Arc<dyn TextCompletion> {
        match tier {
            ProviderTier::Fast => &self.fast,
            ProviderTier::Standard => &self.standard,
            ProviderTier::Premium => &self.premium,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateOptions {
    pub completion: CompletionOptions,
    pub force_premium: bool,
}

/// A successful completion and the metric recorded for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub tier: ProviderTier,
    pub provider_name: String,
    pub metric: ProviderMetric,
}

/// Aggregates over the retained metrics of one tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TierSummary {
    pub calls: usize,
    pub failures: usize,
    pub mean_response_time_ms: f64,
    pub mean_quality: Option<f64>,
    pub tokens_used: u64,
    pub cost: f64,
}

pub struct AdaptiveModelSelector {
    providers: ProviderSet,
    config: SelectorConfig,
    metrics: Mutex<VecDeque<ProviderMetric>>,
    consecutive_failures: AtomicU32,
}

impl AdaptiveModelSelector {
    pub fn new(providers: ProviderSet, config: SelectorConfig) -> Self {
        Self {
            providers,
            config,
            metrics: Mutex::new(VecDeque::new()),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    fn log(&self) -> MutexGuard<'_, VecDeque<ProviderMetric>> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tier the next call for `task_class` would use.
    pub fn select_provider(&self, task_class: TaskClass, force_premium: bool) -> ProviderTier {
        let recent: Vec<ProviderMetric> = self.log().iter().cloned().collect();
        let (tier, reason) = choose_tier(
            &self.config.policy(),
            task_class,
            force_premium,
            self.consecutive_failures(),
            &recent,
        );
        debug!(?task_class, %tier, ?reason, "selected provider tier");
        tier
    }

    /// Generate with the selected tier, escalating one tier per failed call.
    #[instrument(skip_all, fields(task_class = ?task_class, prompt_bytes = prompt.len()))]
    pub async fn generate(
        &self,
        prompt: &str,
        task_class: TaskClass,
        options: &GenerateOptions,
    ) -> Result<Generation, SelectorError> {
        let mut tier = self.select_provider(task_class, options.force_premium);
        let mut errors = Vec::new();

        for attempt in 1..=self.config.max_attempts {
            let provider = self.providers.get(tier);
            let started = Instant::now();
            let outcome = provider.generate(prompt, &options.completion).await;
            let response_time_ms =
                u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match outcome {
                Ok(completion) => {
                    let metric = ProviderMetric {
                        provider: tier,
                        provider_name: provider.name().to_string(),
                        response_time_ms,
                        quality_score: None,
                        validation_passed: true,
                        tokens_used: completion.tokens_used,
                        cost: completion.cost,
                    };
                    self.record_metric(metric.clone());
                    info!(attempt, %tier, response_time_ms, "completion succeeded");
                    return Ok(Generation {
                        text: completion.text,
                        tier,
                        provider_name: provider.name().to_string(),
                        metric,
                    });
                }
                Err(err) => {
                    let message = format!("{tier} ({}): {err:#}", provider.name());
                    warn!(attempt, %tier, error = %message, "completion failed, escalating");
                    self.record_metric(ProviderMetric {
                        provider: tier,
                        provider_name: provider.name().to_string(),
                        response_time_ms,
                        quality_score: None,
                        validation_passed: false,
                        tokens_used: 0,
                        cost: 0.0,
                    });
                    errors.push(message);
                    tier = tier.escalate();
                }
            }
        }

        Err(SelectorError::Exhausted {
            attempts: self.config.max_attempts,
            errors,
        })
    }

    /// Append a metric, evicting the oldest beyond `metrics_window`.
    pub fn record_metric(&self, metric: ProviderMetric) {
        let mut log = self.log();
        log.push_back(metric);
        while log.len() > self.config.metrics_window {
            log.pop_front();
        }
    }

    /// Feedback from the consumer of a generation.
    ///
    /// Updates the most recent metric of `tier` and the consecutive-failure
    /// counter that drives escalation.
    pub fn report_outcome(&self, tier: ProviderTier, quality_score: f64, validation_passed: bool) {
        {
            let mut log = self.log();
            if let Some(metric) = log.iter_mut().rev().find(|metric| metric.provider == tier) {
                metric.quality_score = Some(quality_score);
                metric.validation_passed = validation_passed;
            }
        }
        if validation_passed {
            self.consecutive_failures.store(0, Ordering::SeqCst);
        } else {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(%tier, failures, "validation failure reported");
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Retained metrics, oldest first.
    pub fn metrics(&self) -> Vec<ProviderMetric> {
        self.log().iter().cloned().collect()
    }

    pub fn tier_summary(&self) -> BTreeMap<ProviderTier, TierSummary> {
        let log = self.log();
        ProviderTier::ALL
            .into_iter()
            .map(|tier| {
                let metrics = log.iter().filter(|metric| metric.provider == tier);
                (tier, summarize(metrics))
            })
            .collect()
    }
}

fn summarize<'a>(metrics: impl Iterator<Item = &'a ProviderMetric>) -> TierSummary {
    let mut summary = TierSummary::default();
    let mut total_time = 0u64;
    let mut qualities = Vec::new();
    for metric in metrics {
        summary.calls += 1;
        if !metric.validation_passed {
            summary.failures += 1;
        }
        total_time += metric.response_time_ms;
        summary.tokens_used += metric.tokens_used;
        summary.cost += metric.cost;
        qualities.extend(metric.quality_score);
    }
    if summary.calls > 0 {
        summary.mean_response_time_ms = total_time as f64 / summary.calls as f64;
    }
    if !qualities.is_empty() {
        summary.mean_quality = Some(qualities.iter().sum::<f64>() / qualities.len() as f64);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedCompletion;

    struct Tiers {
        fast: Arc<ScriptedCompletion>,
        standard: Arc<ScriptedCompletion>,
        premium: Arc<ScriptedCompletion>,
    }

    impl Tiers {
        fn new(
            fast: Vec<Result<String, String>>,
            standard: Vec<Result<String, String>>,
            premium: Vec<Result<String, String>>,
        ) -> Self {
            Self {
                fast: Arc::new(ScriptedCompletion::new("fast", fast)),
                standard: Arc::new(ScriptedCompletion::new("standard", standard)),
                premium: Arc::new(ScriptedCompletion::new("premium", premium)),
            }
        }

        fn selector(&self, config: SelectorConfig) -> AdaptiveModelSelector {
            AdaptiveModelSelector::new(
                ProviderSet {
                    fast: self.fast.clone(),
                    standard: self.standard.clone(),
                    premium: self.premium.clone(),
                },
                config,
            )
        }
    }

    fn ok(text: &str) -> Result<String, String> {
        Ok(text.to_string())
    }

    fn err(text: &str) -> Result<String, String> {
        Err(text.to_string())
    }

    #[tokio::test]
    async fn planning_uses_fast_tier() {
        let tiers = Tiers::new(vec![ok("plan")], vec![], vec![]);
        let selector = tiers.selector(SelectorConfig::default());

        let generation = selector
            .generate("p", TaskClass::Planning, &GenerateOptions::default())
            .await
            .expect("generate");

        assert_eq!(generation.text, "plan");
        assert_eq!(generation.tier, ProviderTier::Fast);
        assert_eq!(generation.provider_name, "fast");
        assert_eq!(selector.metrics().len(), 1);
    }

    #[tokio::test]
    async fn failures_escalate_one_tier_per_attempt() {
        let tiers = Tiers::new(vec![err("timeout")], vec![err("overloaded")], vec![ok("done")]);
        let selector = tiers.selector(SelectorConfig::default());

        let generation = selector
            .generate("p", TaskClass::Planning, &GenerateOptions::default())
            .await
            .expect("generate");

        assert_eq!(generation.tier, ProviderTier::Premium);
        assert_eq!(
            (tiers.fast.calls(), tiers.standard.calls(), tiers.premium.calls()),
            (1, 1, 1)
        );
        let passed: Vec<bool> = selector
            .metrics()
            .iter()
            .map(|metric| metric.validation_passed)
            .collect();
        assert_eq!(passed, vec![false, false, true]);
    }

    #[tokio::test]
    async fn exhaustion_reports_every_error() {
        let tiers = Tiers::new(vec![], vec![err("a")], vec![err("b"), err("c")]);
        let selector = tiers.selector(SelectorConfig::default());

        let error = selector
            .generate("p", TaskClass::General, &GenerateOptions::default())
            .await
            .unwrap_err();

        let SelectorError::Exhausted { attempts, errors } = error;
        assert_eq!(attempts, 3);
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("standard"));
        assert!(errors[2].contains('c'));
        assert_eq!(tiers.premium.calls(), 2);
    }

    #[test]
    fn consecutive_reported_failures_force_premium() {
        let tiers = Tiers::new(vec![], vec![], vec![]);
        let selector = tiers.selector(SelectorConfig::default());

        selector.report_outcome(ProviderTier::Fast, 0.0, false);
        assert_eq!(
            selector.select_provider(TaskClass::Planning, false),
            ProviderTier::Fast
        );
        selector.report_outcome(ProviderTier::Fast, 0.0, false);
        for class in [TaskClass::Planning, TaskClass::Validation, TaskClass::General] {
            assert_eq!(selector.select_provider(class, false), ProviderTier::Premium);
        }

        selector.report_outcome(ProviderTier::Premium, 100.0, true);
        assert_eq!(selector.consecutive_failures(), 0);
        assert_eq!(
            selector.select_provider(TaskClass::Planning, false),
            ProviderTier::Fast
        );
    }

    #[test]
    fn slow_recent_calls_force_premium() {
        let tiers = Tiers::new(vec![], vec![], vec![]);
        let selector = tiers.selector(SelectorConfig::default());
        for _ in 0..5 {
            selector.record_metric(ProviderMetric {
                provider: ProviderTier::Fast,
                provider_name: "fast".to_string(),
                response_time_ms: 45_000,
                quality_score: None,
                validation_passed: true,
                tokens_used: 10,
                cost: 0.0,
            });
        }
        assert_eq!(
            selector.select_provider(TaskClass::Planning, false),
            ProviderTier::Premium
        );
        assert_eq!(
            selector.select_provider(TaskClass::Planning, true),
            ProviderTier::Premium
        );
    }

    #[tokio::test]
    async fn report_outcome_scores_latest_metric_of_tier() {
        let tiers = Tiers::new(vec![ok("a"), ok("b")], vec![], vec![]);
        let selector = tiers.selector(SelectorConfig::default());
        let options = GenerateOptions::default();
        selector
            .generate("p", TaskClass::Planning, &options)
            .await
            .expect("first");
        selector
            .generate("p", TaskClass::Planning, &options)
            .await
            .expect("second");

        selector.report_outcome(ProviderTier::Fast, 0.0, false);

        let metrics = selector.metrics();
        assert_eq!(metrics[0].quality_score, None);
        assert_eq!(metrics[1].quality_score, Some(0.0));
        assert!(!metrics[1].validation_passed);

        let summary = selector.tier_summary();
        assert_eq!(summary[&ProviderTier::Fast].calls, 2);
        assert_eq!(summary[&ProviderTier::Fast].failures, 1);
        assert_eq!(summary[&ProviderTier::Fast].mean_quality, Some(0.0));
        assert_eq!(summary[&ProviderTier::Premium].calls, 0);
    }

    #[test]
    fn metrics_log_is_bounded() {
        let tiers = Tiers::new(vec![], vec![], vec![]);
        let config = SelectorConfig {
            metrics_window: 3,
            ..SelectorConfig::default()
        };
        let selector = tiers.selector(config);
        for response_time_ms in 0..5 {
            selector.record_metric(ProviderMetric {
                provider: ProviderTier::Standard,
                provider_name: "standard".to_string(),
                response_time_ms,
                quality_score: None,
                validation_passed: true,
                tokens_used: 0,
                cost: 0.0,
            });
        }
        let kept: Vec<u64> = selector
            .metrics()
            .iter()
            .map(|metric| metric.response_time_ms)
            .collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shared_selector_records_every_concurrent_call() {
        const CALLS: usize = 16;
        let tiers = Tiers::new(vec![ok("plan"); CALLS], vec![], vec![]);
        let selector = Arc::new(tiers.selector(SelectorConfig::default()));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..CALLS {
            let selector = selector.clone();
            tasks.spawn(async move {
                selector
                    .generate("p", TaskClass::Planning, &GenerateOptions::default())
                    .await
                    .expect("generate")
                    .tier
            });
        }
        let mut tiers_used = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            tiers_used.push(joined.expect("task"));
        }
        assert!(tiers_used.iter().all(|tier| *tier == ProviderTier::Fast));
        assert_eq!(tiers.fast.calls(), CALLS);
        assert_eq!(selector.metrics().len(), CALLS);

        let mut reports = tokio::task::JoinSet::new();
        for _ in 0..CALLS {
            let selector = selector.clone();
            reports.spawn(async move { selector.report_outcome(ProviderTier::Fast, 0.0, false) });
        }
        while let Some(joined) = reports.join_next().await {
            joined.expect("report");
        }
        assert_eq!(selector.consecutive_failures(), CALLS as u32);
    }
}
