//! Plan invariants checked before any auto-correction.

use std::collections::HashSet;

use crate::core::types::Plan;

/// Check identity invariants:
/// - at least one step
/// - no empty step ids
/// - no duplicate step ids
/// - no empty tool names
pub fn validate_invariants(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    if plan.steps.is_empty() {
        errors.push("plan has no steps".to_string());
        return errors;
    }

    let mut seen = HashSet::new();
    for (index, step) in plan.steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            errors.push(format!("step #{}: empty id", index + 1));
            continue;
        }
        if !seen.insert(step.id.as_str()) {
            errors.push(format!("duplicate step id '{}'", step.id));
        }
        if step.tool.trim().is_empty() {
            errors.push(format!("{}: empty tool name", step.id));
        }
    }
    errors
}
