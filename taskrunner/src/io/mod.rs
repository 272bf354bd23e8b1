//! I/O helpers: config, filesystem, providers, prompts, plan files.

pub mod completion;
pub mod config;
pub mod fs;
pub mod plan_store;
pub mod process;
pub mod prompt;
