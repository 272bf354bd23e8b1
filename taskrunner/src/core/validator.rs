//! Plan repair and validation.
//!
//! Model-generated plans are untrusted data. [`validate_plan`] is the only gate
//! between a parsed plan and the engine: it checks identity invariants, rewrites
//! dependencies that name files instead of steps, checks tools and references,
//! and rejects cycles. Auto-correction runs before the cycle check because it
//! both removes and introduces edges.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use crate::core::classifier::{declared_write_path, file_name};
use crate::core::invariants::validate_invariants;
use crate::core::topo::plan_order;
use crate::core::types::{Plan, StepId, StepStatus};
use crate::error::PlanError;

/// What the validator needs to know about registered tools.
pub trait ToolCatalog {
    fn has_tool(&self, name: &str) -> bool;
    /// True for tools whose effect is writing a file named by a path parameter.
    fn writes_file(&self, name: &str) -> bool;
}

/// A dependency entry rewritten by auto-correction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub step: StepId,
    pub from: String,
    pub to: StepId,
}

/// Validate `plan` against `catalog`, returning the corrected plan.
///
/// Re-validating a plan this function returned is a no-op.
#[instrument(skip_all, fields(steps = plan.steps.len()))]
pub fn validate_plan<C: ToolCatalog + ?Sized>(
    mut plan: Plan,
    catalog: &C,
) -> Result<Plan, PlanError> {
    let errors = validate_invariants(&plan);
    if !errors.is_empty() {
        return Err(PlanError::validation(errors.join("; ")));
    }

    let corrections = auto_correct(&mut plan, catalog);
    for correction in &corrections {
        debug!(
            step = %correction.step,
            from = %correction.from,
            to = %correction.to,
            "rewrote dependency"
        );
    }

    let errors = structural_errors(&plan, catalog);
    if !errors.is_empty() {
        return Err(PlanError::validation(errors.join("; ")));
    }

    plan.rebuild_dependency_map();
    if let Err(cycle) = plan_order(&plan) {
        return Err(PlanError::validation(format!(
            "circular dependency: {}",
            cycle.join(" -> ")
        )));
    }

    for step in &mut plan.steps {
        step.status = StepStatus::Pending;
        step.result = None;
    }
    debug!(corrections = corrections.len(), "plan validated");
    Ok(plan)
}

/// Rewrite file-name dependencies to the ids of the steps that write them, and
/// add dependencies implied by step-output references.
///
/// Entries that are already step ids are kept. Unresolvable entries are left
/// unchanged so the structural check reports them.
pub fn auto_correct<C: ToolCatalog + ?Sized>(plan: &mut Plan, catalog: &C) -> Vec<Correction> {
    let ids: HashSet<StepId> = plan.step_ids().into_iter().collect();
    let writers = written_paths(plan, catalog);
    let mut corrections = Vec::new();

    for step in &mut plan.steps {
        let declared = std::mem::take(&mut step.dependencies);
        let mut deps: Vec<StepId> = Vec::with_capacity(declared.len());

        for dep in declared {
            let resolved = if ids.contains(&dep) {
                dep
            } else if let Some(owner) = lookup_writer(&writers, &dep) {
                if owner == &step.id {
                    // A step "depending" on the file it writes itself.
                    continue;
                }
                corrections.push(Correction {
                    step: step.id.clone(),
                    from: dep,
                    to: owner.clone(),
                });
                owner.clone()
            } else {
                dep
            };
            if !deps.contains(&resolved) {
                deps.push(resolved);
            }
        }

        let referenced: Vec<StepId> = step.references().map(str::to_string).collect();
        for reference in referenced {
            if ids.contains(&reference) && reference != step.id && !deps.contains(&reference) {
                deps.push(reference);
            }
        }

        step.dependencies = deps;
    }

    corrections
}

/// Map every path written by a file-producing step to that step's id.
///
/// Both the normalized full path and the bare file name are keys; the first
/// writer of a path wins.
fn written_paths<C: ToolCatalog + ?Sized>(plan: &Plan, catalog: &C) -> HashMap<String, StepId> {
    let mut writers = HashMap::new();
    for step in &plan.steps {
        if !catalog.writes_file(&step.tool) {
            continue;
        }
        let Some(path) = declared_write_path(step) else {
            continue;
        };
        let normalized = normalize_path(path);
        writers
            .entry(normalized.to_string())
            .or_insert_with(|| step.id.clone());
        writers
            .entry(file_name(normalized).to_string())
            .or_insert_with(|| step.id.clone());
    }
    writers
}

fn lookup_writer<'a>(writers: &'a HashMap<String, StepId>, entry: &str) -> Option<&'a StepId> {
    let normalized = normalize_path(entry.trim());
    writers
        .get(normalized)
        .or_else(|| writers.get(file_name(normalized)))
}

fn normalize_path(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

fn structural_errors<C: ToolCatalog + ?Sized>(plan: &Plan, catalog: &C) -> Vec<String> {
    let ids: HashSet<&str> = plan.steps.iter().map(|step| step.id.as_str()).collect();
    let mut errors = Vec::new();

    for step in &plan.steps {
        if !catalog.has_tool(&step.tool) {
            errors.push(format!("{}: unknown tool '{}'", step.id, step.tool));
        }
        for dep in &step.dependencies {
            if !ids.contains(dep.as_str()) {
                errors.push(format!("{}: dependency '{}' does not name a step", step.id, dep));
            }
        }
        for reference in step.references() {
            if reference == step.id {
                errors.push(format!("{}: references its own output", step.id));
            } else if !ids.contains(reference) {
                errors.push(format!(
                    "{}: parameter references unknown step '{}'",
                    step.id, reference
                ));
            }
        }
    }
    errors
}
