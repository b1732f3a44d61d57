//! CLI module for the promotion compare tool.
//!
//! This module provides the command-line interface for comparing
//! workflow definitions between promotion stages.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
