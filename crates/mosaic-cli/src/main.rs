//! Mosaic CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;

mod commands;
mod config;
mod executors;
mod handlers;

use commands::{Commands, ConfigCommands};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "mosaic")]
#[command(author, version, about = "Mosaic work graph executor", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref())?;
    mosaic_trace::init_tracer(&config.tracing)?;

    let result = match cli.command {
        Commands::Validate { graph } => handlers::validate(&graph),
        Commands::Plan { graph } => handlers::plan(&graph),
        Commands::Schema => handlers::schema(),
        Commands::Run {
            graph,
            build_id,
            plan,
            dry_run,
            policy,
        } => {
            handlers::run(
                &config,
                handlers::RunOptions {
                    graph,
                    build_id,
                    plan,
                    dry_run,
                    policy,
                },
            )
            .await
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config),
            ConfigCommands::Path => handlers::show_config_path(),
        },
    };

    mosaic_trace::shutdown_tracer();
    result
}
