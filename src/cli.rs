//! Command-line interface for ezwarden
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// ezwarden - remote ezjail lifecycle manager
#[derive(Parser)]
#[command(name = "ezwarden")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "ezwarden.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show the state of an instance
    Status {
        /// Instance id
        instance: String,
    },

    /// Create (if needed) and start an instance
    Start {
        /// Instance id
        instance: String,

        /// Startup script to inject instead of the configured one
        #[arg(long)]
        startup_script: Option<PathBuf>,
    },

    /// Stop a running instance
    Stop {
        /// Instance id
        instance: String,
    },

    /// Stop and delete an instance
    Terminate {
        /// Instance id
        instance: String,
    },

    /// Show ssh host key fingerprints of a running instance
    Fingerprints {
        /// Instance id
        instance: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the state of all instances and unknown jails
    Ps {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration file
    Check,

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "ezwarden", &mut std::io::stdout());
    }
}
