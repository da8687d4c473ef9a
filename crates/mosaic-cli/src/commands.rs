//! CLI command definitions.

use clap::Subcommand;
use mosaic_scheduler::SchedulingPolicy;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a work graph without running it
    Validate {
        /// Path to the work graph (JSON or YAML)
        graph: PathBuf,
    },

    /// Print the execution waves of a work graph
    Plan {
        /// Path to the work graph (JSON or YAML)
        graph: PathBuf,
    },

    /// Print the JSON Schema of the work graph document
    Schema,

    /// Execute a work graph
    Run {
        /// Path to the work graph (JSON or YAML)
        graph: PathBuf,

        /// Build id; doubles as the development environment session id
        #[arg(short, long)]
        build_id: Option<String>,

        /// Build plan forwarded to every task
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Run with simulated executors and no delivery
        #[arg(long)]
        dry_run: bool,

        /// Scheduling policy (overrides the configured one)
        #[arg(long)]
        policy: Option<SchedulingPolicy>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Print the default configuration file path
    Path,
}
