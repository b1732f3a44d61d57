//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::CONFIG_ENV_VAR;

/// promote-compare - Compare workflow definitions across promotion stages.
#[derive(Parser, Debug)]
#[command(name = "promote-compare")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = CONFIG_ENV_VAR)]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compare the workflows of a pipeline stage.
    Compare {
        /// Pipeline identifier.
        #[arg(short, long)]
        pipeline: String,

        /// Stage identifier.
        #[arg(short, long)]
        stage: String,

        /// Restrict the compare to these workflows (repeatable).
        #[arg(short, long = "workflow")]
        workflows: Vec<String>,
    },

    /// Show node, flow and settings changes for one workflow.
    Details {
        /// Pipeline identifier.
        #[arg(short, long)]
        pipeline: String,

        /// Stage identifier.
        #[arg(short, long)]
        stage: String,

        /// Workflow identifier.
        #[arg(short, long)]
        workflow: String,
    },

    /// Validate the engine configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Print the canonical form and content hash of an exported workflow.
    Normalize {
        /// Workflow JSON file.
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Compare two exported workflow files offline.
    DiffFiles {
        /// Source (promoted from) workflow JSON file.
        #[arg(long)]
        source: PathBuf,

        /// Target (promoted to) workflow JSON file.
        #[arg(long)]
        target: PathBuf,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_compare_with_repeated_workflows() {
        let cli = Cli::try_parse_from([
            "promote-compare",
            "--output",
            "json",
            "compare",
            "--pipeline",
            "main",
            "--stage",
            "release",
            "--workflow",
            "wf-1",
            "--workflow",
            "wf-2",
        ])
        .unwrap();

        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Compare { pipeline, stage, workflows } => {
                assert_eq!(pipeline, "main");
                assert_eq!(stage, "release");
                assert_eq!(workflows, vec!["wf-1", "wf-2"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_diff_files_args() {
        let cli = Cli::try_parse_from([
            "promote-compare",
            "diff-files",
            "--source",
            "a.json",
            "--target",
            "b.json",
        ])
        .unwrap();

        assert!(matches!(cli.command, Commands::DiffFiles { .. }));
    }
}
