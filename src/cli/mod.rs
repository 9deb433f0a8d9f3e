//! Command-line interface for vignette.
//!
//! Provides commands for proposing scenario roles and outcomes, building
//! and editing the causal model, and running the combination batch.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
