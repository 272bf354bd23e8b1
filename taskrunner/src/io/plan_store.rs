//! Plan files on disk: schema-checked load, atomic write.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde_json::Value;

use crate::core::types::Plan;
use crate::io::config::write_atomic;

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");

static PLAN_VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(PLAN_SCHEMA).map_err(|err| format!("parse plan schema: {err}"))?;
    validator_for(&schema).map_err(|err| format!("invalid plan schema: {err}"))
});

/// Load a plan file, checking it against the plan schema first.
///
/// The dependency map is rebuilt from the steps; the step lists are
/// authoritative.
pub fn load_plan(path: &Path) -> Result<Plan> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse plan {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("check plan {}", path.display()))?;
    let mut plan: Plan = serde_json::from_value(value)
        .with_context(|| format!("deserialize plan {}", path.display()))?;
    plan.rebuild_dependency_map();
    Ok(plan)
}

/// Write a plan as pretty JSON (temp file + rename).
pub fn write_plan(path: &Path, plan: &Plan) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(plan).context("serialize plan")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn validate_schema(plan: &Value) -> Result<()> {
    let validator = PLAN_VALIDATOR.as_ref().map_err(|err| anyhow!("{err}"))?;
    if validator.is_valid(plan) {
        return Ok(());
    }
    let messages = validator
        .iter_errors(plan)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(anyhow!("plan schema validation failed: {}", messages.join("; ")))
}
