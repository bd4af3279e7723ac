use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "backhaul")]
#[command(author, version, about = "Task-driven backup tool")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every task definition file into a new backup
    Backup,

    /// Replay a backed up task's actions in reverse
    Restore {
        /// Backup to restore from ("current" follows the symlink)
        #[arg(default_value = "current")]
        backup: String,

        /// Restore only this task
        #[arg(long)]
        task: Option<String>,
    },

    /// List finished backups
    List,

    /// Validate configuration and task definition files
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// List registered actions and their capabilities
    ListActions,

    /// Display version information
    Version,
}
