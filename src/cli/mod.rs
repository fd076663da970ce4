//! Command-line interface for aml-pipeline.
//!
//! Provides the `serve`, `submit` and `queues` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
