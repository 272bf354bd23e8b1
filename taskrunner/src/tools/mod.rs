//! Tools the engine can invoke, and the registry that guards them.

pub mod builtin;
pub mod registry;
