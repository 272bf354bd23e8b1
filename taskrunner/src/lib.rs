//! Plan-and-execute task agent.
//!
//! A natural-language task is compiled into a plan: a dependency graph of
//! steps, each a call to a registered tool. The plan is repaired and
//! validated, then executed in dependency order with bounded retries.
//!
//! - **[`core`]**: Pure logic (plan types, repair, validation, ordering,
//!   tier selection policy). No I/O.
//! - **[`io`]**: Side effects (config, filesystem, child processes, prompt
//!   rendering, plan files).
//! - **[`tools`]**: Tool registry and built-in file tools.
//! - **[`agents`]**: Model-facing pieces: the adaptive model selector and the
//!   plan compiler.
//! - **[`engine`]**: Plan execution.
//!
//! [`agent::TaskAgent`] ties them together.

pub mod agent;
pub mod agents;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
