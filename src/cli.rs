// src/cli.rs
//! CLI definitions for buildterm
//!
//! The command implementations live in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "buildterm")]
#[command(author = "Buildterm Contributors")]
#[command(version)]
#[command(about = "Run queued package builds and classify their output", long_about = None)]
pub struct Cli {
    /// Configuration file (default: ~/.config/buildterm/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Do not echo build output; print only the summary
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue jobs and run them one after another
    Run {
        /// Jobs as NAME=COMMAND, e.g. "foo=emerge -v dev-libs/foo"
        #[arg(required = true)]
        jobs: Vec<String>,

        /// Use a plain pipe instead of a pseudo-terminal
        #[arg(long)]
        no_pty: bool,

        /// Write process, warning, caution and info logs to this directory
        #[arg(long)]
        save_dir: Option<PathBuf>,

        /// Logs to save, e.g. "warning,caution" (default: all)
        #[arg(long, value_delimiter = ',', requires = "save_dir")]
        buffers: Vec<String>,
    },

    /// Replay a saved build log through the classifier
    Replay {
        /// Log file to load
        file: PathBuf,

        /// Write the classified logs to this directory
        #[arg(long)]
        save_dir: Option<PathBuf>,

        /// Logs to save, e.g. "warning,caution" (default: all)
        #[arg(long, value_delimiter = ',', requires = "save_dir")]
        buffers: Vec<String>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}
