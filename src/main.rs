//! Layerdeck CLI - Multi-layer Audio Timeline
//!
//! Command-line interface for the Layerdeck timeline engine.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use layerdeck::cli::commands;
use layerdeck::cli::{Cli, Commands};
use layerdeck::config::EngineConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    info!("Layerdeck v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Some(cmd) => handle_command(cmd, &config),
        None => {
            println!("Layerdeck v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands, config: &EngineConfig) -> Result<()> {
    match cmd {
        Commands::Render {
            project,
            output,
            sample_rate,
            master_volume,
        } => commands::render(&project, &output, sample_rate, master_volume, config)
            .with_context(|| format!("failed to render {}", project.display())),
        Commands::Inspect { project } => commands::inspect(&project, config)
            .with_context(|| format!("failed to inspect {}", project.display())),
        Commands::Preview {
            project,
            output,
            seconds,
            from,
        } => commands::preview(&project, &output, seconds, &from, config)
            .with_context(|| format!("failed to preview {}", project.display())),
        Commands::Add {
            project,
            wav,
            at,
            loop_for,
            name,
        } => commands::add(
            &project,
            &wav,
            &at,
            loop_for.as_deref(),
            name.as_deref(),
            config,
        )
        .with_context(|| format!("failed to add {} to {}", wav.display(), project.display())),
        Commands::ParseTime { input } => commands::parse_time_command(&input)
            .with_context(|| format!("invalid time string '{}'", input)),
    }
}
