//! Command-line interface for forgeflow.
//!
//! `run` executes the full stage plan for one language target; `plan`
//! prints the plan without touching the filesystem.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands, LogFormat, PlanArgs, RunArgs};
