//! Deterministic, pure logic shared by the planner and engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! plans and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod invariants;
pub mod raw_plan;
pub mod repair;
pub mod schema;
pub mod selector;
pub mod topo;
pub mod types;
pub mod validator;
