//! Lenient decoding of model-shaped plans into [`Plan`].
//!
//! Models drift on field names (`tool` vs `capability`, `dependencies` vs
//! `depends_on`), omit ids, and sometimes wrap the object. Decoding accepts
//! those variants; it does not check semantics (see `core::validator`).

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::core::types::{ParamValue, Plan, Step, StepStatus};
use crate::error::PlanError;

// Accepted keys per field, in priority order. When a step carries several
// (`name` and `description`), the first present one wins.
const STEPS_KEYS: &[&str] = &["steps", "plan", "tasks"];
const ESTIMATE_KEYS: &[&str] = &["estimated_time", "estimatedTime", "estimated_duration"];
const ID_KEYS: &[&str] = &["id", "step_id", "stepId"];
const DESCRIPTION_KEYS: &[&str] = &["description", "title", "name"];
const TOOL_KEYS: &[&str] = &[
    "tool",
    "capability",
    "capabilityName",
    "capability_name",
    "tool_name",
    "toolName",
    "action",
];
const PARAMETER_KEYS: &[&str] = &["parameters", "params", "args", "arguments", "input"];
const DEPENDENCY_KEYS: &[&str] = &["dependencies", "depends_on", "dependsOn", "after"];

/// Decode a parsed model payload into a pending [`Plan`].
///
/// Accepts `{"steps": [...]}`, `{"plan": {"steps": [...]}}`, and a bare array
/// of steps. Missing ids become `step_<n>` by position.
pub fn plan_from_value(value: Value) -> Result<Plan, PlanError> {
    let (steps, estimate) = match unwrap_plan(value) {
        Value::Array(steps) => (steps, None),
        Value::Object(map) => {
            let steps = match first(&map, STEPS_KEYS) {
                None => Vec::new(),
                Some(Value::Array(steps)) => steps.clone(),
                Some(other) => {
                    return Err(shape_error(format!("steps must be an array, got {other}")));
                }
            };
            (steps, first(&map, ESTIMATE_KEYS).and_then(estimated_seconds))
        }
        other => return Err(shape_error(format!("expected an object or array, got {other}"))),
    };

    let steps = steps
        .into_iter()
        .enumerate()
        .map(|(index, step)| convert_step(index, step))
        .collect::<Result<Vec<_>, _>>()?;

    let mut plan = Plan::new(steps);
    plan.estimated_time = estimate.unwrap_or(0.0);
    Ok(plan)
}

fn unwrap_plan(value: Value) -> Value {
    match value {
        Value::Object(mut map) if !map.contains_key("steps") => match map.remove("plan") {
            Some(inner @ (Value::Object(_) | Value::Array(_))) => inner,
            Some(other) => {
                map.insert("plan".to_string(), other);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        other => other,
    }
}

fn shape_error(detail: String) -> PlanError {
    PlanError::Parse(format!("plan has unexpected shape: {detail}"))
}

/// First non-null value among `keys`.
fn first<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| map.get(*key).filter(|value| !value.is_null()))
}

fn text_field(
    map: &Map<String, Value>,
    keys: &[&str],
    position: usize,
) -> Result<Option<String>, PlanError> {
    match first(map, keys) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(other) => Err(shape_error(format!(
            "step {position}: `{}` must be a string, got {other}",
            keys[0]
        ))),
    }
}

fn convert_step(index: usize, value: Value) -> Result<Step, PlanError> {
    let position = index + 1;
    let Value::Object(map) = value else {
        return Err(shape_error(format!("step {position} is not an object")));
    };

    let id = first(&map, ID_KEYS)
        .and_then(id_string)
        .unwrap_or_else(|| format!("step_{position}"));

    let parameters: BTreeMap<String, ParamValue> = match first(&map, PARAMETER_KEYS) {
        None => BTreeMap::new(),
        Some(Value::Object(params)) => params
            .iter()
            .map(|(name, value)| (name.clone(), ParamValue::from_raw(value.clone())))
            .collect(),
        Some(other) => {
            return Err(shape_error(format!(
                "step {position}: `parameters` must be an object, got {other}"
            )));
        }
    };

    let dependencies = match first(&map, DEPENDENCY_KEYS) {
        None => Vec::new(),
        Some(Value::Array(deps)) => deps.iter().filter_map(id_string).collect(),
        Some(single @ (Value::String(_) | Value::Number(_))) => {
            id_string(single).into_iter().collect()
        }
        Some(other) => {
            return Err(shape_error(format!(
                "step {position}: `dependencies` must be an array, got {other}"
            )));
        }
    };

    Ok(Step {
        id,
        description: text_field(&map, DESCRIPTION_KEYS, position)?.unwrap_or_default(),
        tool: text_field(&map, TOOL_KEYS, position)?.unwrap_or_default(),
        parameters,
        dependencies,
        status: StepStatus::Pending,
        result: None,
    })
}

/// Ids may arrive as strings or numbers.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Seconds from a number or a string with a leading number ("90", "5 minutes").
fn estimated_seconds(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let text = text.trim();
            let end = text
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(text.len());
            let amount: f64 = text[..end].parse().ok()?;
            let unit = text[end..].trim_start().to_ascii_lowercase();
            let factor = if unit.starts_with("min") {
                60.0
            } else if unit.starts_with("hour") || unit.starts_with('h') {
                3600.0
            } else {
                1.0
            };
            Some(amount * factor)
        }
        _ => None,
    }
}
