//! Depth-first topological ordering with cycle detection.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::core::types::{Plan, StepId};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Order `ids` so every id comes after its dependencies.
///
/// Roots are visited in `ids` order, so independent steps keep their plan
/// order. Dependencies not present in `ids` are skipped here; callers decide
/// whether they are an error. On a cycle, returns the cycle path with the
/// repeated node at both ends.
pub fn topological_order(
    ids: &[StepId],
    dependencies: &BTreeMap<StepId, Vec<StepId>>,
) -> Result<Vec<StepId>, Vec<StepId>> {
    let known: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    // Open nodes with the index of their next dependency to visit.
    let mut frames: Vec<(&str, usize)> = Vec::new();
    let mut order = Vec::with_capacity(ids.len());

    for root in ids {
        if marks.contains_key(root.as_str()) {
            continue;
        }
        marks.insert(root.as_str(), Mark::Visiting);
        frames.push((root.as_str(), 0));

        while let Some(frame) = frames.last_mut() {
            let (id, next) = *frame;
            let deps = dependencies.get(id).map(Vec::as_slice).unwrap_or_default();
            let Some(dep) = deps.get(next) else {
                frames.pop();
                marks.insert(id, Mark::Done);
                order.push(id.to_string());
                continue;
            };
            frame.1 += 1;
            if !known.contains(dep.as_str()) {
                continue;
            }
            match marks.get(dep.as_str()) {
                Some(Mark::Done) => {}
                Some(Mark::Visiting) => return Err(cycle_path(&frames, dep)),
                None => {
                    marks.insert(dep.as_str(), Mark::Visiting);
                    frames.push((dep.as_str(), 0));
                }
            }
        }
    }

    Ok(order)
}

fn cycle_path(frames: &[(&str, usize)], repeated: &str) -> Vec<StepId> {
    let start = frames
        .iter()
        .position(|(id, _)| *id == repeated)
        .unwrap_or(0);
    let mut path: Vec<StepId> = frames[start..].iter().map(|(id, _)| id.to_string()).collect();
    path.push(repeated.to_string());
    path
}

/// Execution order for a plan's steps.
pub fn plan_order(plan: &Plan) -> Result<Vec<StepId>, Vec<StepId>> {
    topological_order(&plan.step_ids(), &plan.dependency_map)
}
