// src/main.rs

use anyhow::Result;
use buildterm::TerminalConfig;
use clap::Parser;

mod cli;
mod commands;
mod interrupt;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the build output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = TerminalConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            jobs,
            no_pty,
            save_dir,
            buffers,
        } => {
            let save = commands::save_target(save_dir.as_deref(), &buffers)?;
            commands::cmd_run(config, &jobs, no_pty, save, cli.quiet)
        }
        Commands::Replay {
            file,
            save_dir,
            buffers,
        } => {
            let save = commands::save_target(save_dir.as_deref(), &buffers)?;
            commands::cmd_replay(config, &file, save, cli.quiet)
        }
        Commands::ShowConfig => commands::cmd_show_config(&config),
    }
}
