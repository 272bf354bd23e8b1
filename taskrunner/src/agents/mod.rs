//! Model-facing agents: provider selection and plan compilation.

pub mod planner;
pub mod selector;
