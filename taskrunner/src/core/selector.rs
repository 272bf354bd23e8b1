//! Deterministic provider-tier selection rules.
//!
//! Pure decision logic for the adaptive selector. The stateful wrapper that
//! owns providers and the metrics log lives in `agents::selector`.

use serde::{Deserialize, Serialize};

/// Completion provider tiers, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTier {
    Fast,
    Standard,
    Premium,
}

impl ProviderTier {
    pub const ALL: [ProviderTier; 3] = [
        ProviderTier::Fast,
        ProviderTier::Standard,
        ProviderTier::Premium,
    ];

    /// Next tier up; premium stays premium.
    pub fn escalate(self) -> Self {
        match self {
            ProviderTier::Fast => ProviderTier::Standard,
            ProviderTier::Standard | ProviderTier::Premium => ProviderTier::Premium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderTier::Fast => "fast",
            ProviderTier::Standard => "standard",
            ProviderTier::Premium => "premium",
        }
    }
}

impl std::fmt::Display for ProviderTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work a completion is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    Planning,
    Validation,
    CodeGeneration,
    General,
}

impl TaskClass {
    /// Tier used when no escalation signal applies.
    pub fn default_tier(self) -> ProviderTier {
        match self {
            TaskClass::Planning | TaskClass::Validation => ProviderTier::Fast,
            TaskClass::CodeGeneration | TaskClass::General => ProviderTier::Standard,
        }
    }
}

/// One completion call as seen by the selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetric {
    pub provider: ProviderTier,
    pub provider_name: String,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    pub validation_passed: bool,
    pub tokens_used: u64,
    pub cost: f64,
}

/// Thresholds for escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub max_validation_failures: u32,
    pub latency_ceiling_ms: u64,
    pub latency_window: usize,
}

/// Why a tier was chosen; recorded in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    Forced,
    ValidationFailures,
    Latency,
    TaskClass,
}

/// Apply the selection rules in order:
/// 1. forced premium
/// 2. consecutive validation failures at or above the threshold
/// 3. mean latency of the most recent calls above the ceiling
/// 4. the task class default
///
/// `recent` is the metrics log oldest-first; only its tail is consulted.
pub fn choose_tier(
    policy: &SelectionPolicy,
    task_class: TaskClass,
    force_premium: bool,
    consecutive_failures: u32,
    recent: &[ProviderMetric],
) -> (ProviderTier, SelectionReason) {
    if force_premium {
        return (ProviderTier::Premium, SelectionReason::Forced);
    }
    if consecutive_failures >= policy.max_validation_failures {
        return (ProviderTier::Premium, SelectionReason::ValidationFailures);
    }
    if let Some(mean) = mean_latency_ms(recent, policy.latency_window)
        && mean > policy.latency_ceiling_ms as f64
    {
        return (ProviderTier::Premium, SelectionReason::Latency);
    }
    (task_class.default_tier(), SelectionReason::TaskClass)
}

/// Mean response time of the last `window` metrics, if any.
pub fn mean_latency_ms(metrics: &[ProviderMetric], window: usize) -> Option<f64> {
    if window == 0 || metrics.is_empty() {
        return None;
    }
    let tail = &metrics[metrics.len().saturating_sub(window)..];
    let total: u64 = tail.iter().map(|metric| metric.response_time_ms).sum();
    Some(total as f64 / tail.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SelectionPolicy {
        SelectionPolicy {
            max_validation_failures: 2,
            latency_ceiling_ms: 30_000,
            latency_window: 5,
        }
    }

    fn metric(response_time_ms: u64) -> ProviderMetric {
        ProviderMetric {
            provider: ProviderTier::Fast,
            provider_name: "fast".to_string(),
            response_time_ms,
            quality_score: None,
            validation_passed: true,
            tokens_used: 0,
            cost: 0.0,
        }
    }

    #[test]
    fn task_class_picks_default_tier() {
        let (tier, reason) = choose_tier(&policy(), TaskClass::Planning, false, 0, &[]);
        assert_eq!((tier, reason), (ProviderTier::Fast, SelectionReason::TaskClass));
        let (tier, _) = choose_tier(&policy(), TaskClass::Validation, false, 0, &[]);
        assert_eq!(tier, ProviderTier::Fast);
        let (tier, _) = choose_tier(&policy(), TaskClass::CodeGeneration, false, 0, &[]);
        assert_eq!(tier, ProviderTier::Standard);
    }

    #[test]
    fn forced_premium_wins() {
        let (tier, reason) = choose_tier(&policy(), TaskClass::Planning, true, 0, &[]);
        assert_eq!((tier, reason), (ProviderTier::Premium, SelectionReason::Forced));
    }

    #[test]
    fn validation_failures_escalate_regardless_of_class() {
        let (tier, reason) = choose_tier(&policy(), TaskClass::Planning, false, 1, &[]);
        assert_eq!((tier, reason), (ProviderTier::Fast, SelectionReason::TaskClass));
        for class in [TaskClass::Planning, TaskClass::General] {
            let (tier, reason) = choose_tier(&policy(), class, false, 2, &[]);
            assert_eq!(
                (tier, reason),
                (ProviderTier::Premium, SelectionReason::ValidationFailures)
            );
        }
    }

    #[test]
    fn slow_recent_calls_escalate() {
        let mut recent: Vec<ProviderMetric> = (0..5).map(|_| metric(40_000)).collect();
        let (tier, reason) = choose_tier(&policy(), TaskClass::Planning, false, 0, &recent);
        assert_eq!((tier, reason), (ProviderTier::Premium, SelectionReason::Latency));

        // Only the last five calls count.
        recent.extend((0..5).map(|_| metric(1_000)));
        let (tier, _) = choose_tier(&policy(), TaskClass::Planning, false, 0, &recent);
        assert_eq!(tier, ProviderTier::Fast);
    }

    #[test]
    fn mean_latency_uses_available_tail() {
        let recent = vec![metric(10), metric(20)];
        assert_eq!(mean_latency_ms(&recent, 5), Some(15.0));
        assert_eq!(mean_latency_ms(&[], 5), None);
    }

    #[test]
    fn escalation_chain_tops_out_at_premium() {
        assert_eq!(ProviderTier::Fast.escalate(), ProviderTier::Standard);
        assert_eq!(ProviderTier::Standard.escalate(), ProviderTier::Premium);
        assert_eq!(ProviderTier::Premium.escalate(), ProviderTier::Premium);
    }
}
