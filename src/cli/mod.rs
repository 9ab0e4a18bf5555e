//! Command-line surface.

pub mod commands;

use clap::{Parser, Subcommand};

/// MeshSeeks: multi-agent orchestration for complex coding tasks.
#[derive(Debug, Parser)]
#[command(name = "meshseeks", version, about)]
pub struct Cli {
    /// Path to a config file (defaults to .meshseeks/config.yaml merging)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Emit machine-readable JSON instead of tables
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Decompose a prompt, execute the task tree, and print the synthesized
    /// artifact
    Solve {
        /// The problem statement
        prompt: String,

        /// Working directory handed to worker subprocesses
        #[arg(short, long, default_value = ".")]
        work_folder: String,

        /// Decomposition strategy: sequential, parallel, hybrid, phased
        #[arg(short, long)]
        approach: Option<String>,

        /// Return per-task summaries instead of full outputs
        #[arg(long, default_value_t = true)]
        summary: bool,
    },

    /// Decompose a prompt and print the planned tasks without executing
    Analyze {
        /// The problem statement
        prompt: String,

        /// Working directory recorded on the planned tasks
        #[arg(short, long, default_value = ".")]
        work_folder: String,
    },

    /// Show the active session and pool health
    Status,

    /// Resume a session from a checkpoint and drive it to completion
    Resume {
        /// Session id to resume
        session_id: String,

        /// Specific checkpoint id (defaults to the latest)
        #[arg(short, long)]
        checkpoint: Option<String>,

        /// Reset failed tasks to pending before resuming
        #[arg(long, default_value_t = false)]
        reset_failed: bool,
    },

    /// List sessions with on-disk state
    Sessions,
}
