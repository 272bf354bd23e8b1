//! Agent configuration stored in `taskrunner.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::selector::{ProviderTier, SelectionPolicy};

/// Top-level configuration (TOML).
///
/// Meant to be edited by hand. Missing fields take the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub planner: PlannerConfig,
    pub selector: SelectorConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Tool invocations per step before the step fails.
    pub max_retries: u32,
    /// Steps attempted per run before the run aborts.
    pub max_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_iterations: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlannerConfig {
    /// Generate-parse-validate rounds before compilation fails.
    pub max_attempts: u32,
    /// Rendered prompt budget; droppable sections go first.
    pub prompt_budget_bytes: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            prompt_budget_bytes: 24_000,
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SelectorConfig {
    /// Consecutive validation failures that force the premium tier.
    pub max_validation_failures: u32,
    /// Mean recent latency above which the premium tier is used.
    pub latency_ceiling_ms: u64,
    /// Number of recent calls the latency mean covers.
    pub latency_window: usize,
    /// Metrics retained in memory; oldest entries are evicted.
    pub metrics_window: usize,
    /// Provider calls per `generate` before giving up.
    pub max_attempts: u32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_validation_failures: 2,
            latency_ceiling_ms: 30_000,
            latency_window: 5,
            metrics_window: 200,
            max_attempts: 3,
        }
    }
}

impl SelectorConfig {
    pub fn policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            max_validation_failures: self.max_validation_failures,
            latency_ceiling_ms: self.latency_ceiling_ms,
            latency_window: self.latency_window,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Program and arguments; the prompt is written to stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl ProviderConfig {
    fn codex(effort: &str) -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "-c".to_string(),
                format!("model_reasoning_effort={effort}"),
                "--skip-git-repo-check".to_string(),
                "-".to_string(),
            ],
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::codex("medium")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub fast: ProviderConfig,
    pub standard: ProviderConfig,
    pub premium: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            fast: ProviderConfig::codex("low"),
            standard: ProviderConfig::codex("medium"),
            premium: ProviderConfig::codex("high"),
        }
    }
}

impl ProvidersConfig {
    pub fn tier(&self, tier: ProviderTier) -> &ProviderConfig {
        match tier {
            ProviderTier::Fast => &self.fast,
            ProviderTier::Standard => &self.standard,
            ProviderTier::Premium => &self.premium,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_retries == 0 {
            return Err(anyhow!("engine.max_retries must be > 0"));
        }
        if self.engine.max_iterations == 0 {
            return Err(anyhow!("engine.max_iterations must be > 0"));
        }
        if self.planner.max_attempts == 0 {
            return Err(anyhow!("planner.max_attempts must be > 0"));
        }
        if self.planner.prompt_budget_bytes == 0 {
            return Err(anyhow!("planner.prompt_budget_bytes must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.planner.temperature) {
            return Err(anyhow!("planner.temperature must be within 0.0..=2.0"));
        }
        if self.selector.max_attempts == 0 {
            return Err(anyhow!("selector.max_attempts must be > 0"));
        }
        if self.selector.metrics_window == 0 {
            return Err(anyhow!("selector.metrics_window must be > 0"));
        }
        for tier in ProviderTier::ALL {
            let provider = self.providers.tier(tier);
            if provider.command.first().is_none_or(|program| program.trim().is_empty()) {
                return Err(anyhow!("providers.{tier}.command must be a non-empty array"));
            }
            if provider.timeout_secs == 0 {
                return Err(anyhow!("providers.{tier}.timeout_secs must be > 0"));
            }
            if provider.output_limit_bytes == 0 {
                return Err(anyhow!("providers.{tier}.output_limit_bytes must be > 0"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `Config::default()`.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &Config) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path has no file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
