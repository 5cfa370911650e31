//! CLI module for the pipeform deployment tool.
//!
//! This module provides the command-line interface for planning and
//! applying pipeline resource deployments.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
