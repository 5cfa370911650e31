//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pipeform - Declarative deployment of data-pipeline resources.
#[derive(Parser, Debug)]
#[command(name = "pipeform")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "PIPEFORM_CONFIG")]
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
    /// Initialize a new pipeform project.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the deployment configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Generate and display the deployment plan.
    Plan {
        /// Show attribute changes for every action.
        #[arg(short, long)]
        detailed: bool,

        /// Drop resources the provider no longer has before planning.
        #[arg(long)]
        refresh: bool,

        /// Plan against the in-memory provider; nothing is written.
        #[arg(long)]
        simulate: bool,
    },

    /// Apply the deployment plan.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Stop starting new actions after the first failure.
        #[arg(long)]
        halt_on_error: bool,

        /// Maximum actions in flight.
        #[arg(long)]
        parallelism: Option<usize>,

        /// Drop resources the provider no longer has before planning.
        #[arg(long)]
        refresh: bool,

        /// Apply against the in-memory provider; nothing is written.
        #[arg(long)]
        simulate: bool,
    },

    /// Destroy all deployed resources.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Destroy against the in-memory provider; nothing is written.
        #[arg(long)]
        simulate: bool,
    },

    /// Check for drift between recorded state and the provider.
    Drift {
        /// Check against the in-memory provider.
        #[arg(long)]
        simulate: bool,
    },

    /// Print rendered template text.
    Render {
        /// Resource whose template attributes to render (`kind.name`).
        #[arg(required_unless_present = "template", conflicts_with = "template")]
        resource: Option<String>,

        /// Named template from the `templates:` section.
        #[arg(short, long)]
        template: Option<String>,

        /// Scalar variable for `--template` (`key=value`).
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// List variable for `--template` (`key=a,b,c`).
        #[arg(long = "list", value_name = "KEY=A,B,C")]
        lists: Vec<String>,
    },

    /// Print the configuration hash and artifact content hashes.
    Hash,

    /// Manage state backend.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long, required_unless_present = "force")]
        lock_id: Option<String>,

        /// Force unlock (dangerous).
        #[arg(long)]
        force: bool,
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
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "pipeform",
            "apply",
            "--yes",
            "--halt-on-error",
            "--parallelism",
            "2",
            "--output",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Apply {
                yes,
                halt_on_error,
                parallelism,
                refresh,
                simulate,
            } => {
                assert!(yes && halt_on_error);
                assert_eq!(parallelism, Some(2));
                assert!(!refresh && !simulate);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_render_requires_resource_or_template() {
        assert!(Cli::try_parse_from(["pipeform", "render"]).is_err());
        let cli = Cli::try_parse_from([
            "pipeform",
            "render",
            "--template",
            "union_days",
            "--list",
            "days=01,02",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Render { resource: None, .. }));
    }

    #[test]
    fn test_unlock_needs_lock_id_or_force() {
        assert!(Cli::try_parse_from(["pipeform", "state", "unlock"]).is_err());
        assert!(Cli::try_parse_from(["pipeform", "state", "unlock", "--force"]).is_ok());
    }
}
