//! CLI argument definitions using clap
//!
//! Commands:
//! - aeroroute token merge <A> <B>
//! - aeroroute token check --required <A> --observed <B>
//! - aeroroute config check --config <path>
//! - aeroroute config defaults
//! - aeroroute barrier-delay --gap <N> --latency-ms <M>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aeroroute - request routing diagnostics
#[derive(Parser, Debug)]
#[command(name = "aeroroute")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log routing events down to info level
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Session token utilities
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Router configuration utilities
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Delay before the next barrier probe
    BarrierDelay {
        /// LSN gap reported by the last probe
        #[arg(long)]
        gap: u64,

        /// Latency of the last probe in milliseconds
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum TokenAction {
    /// Merge two session tokens
    Merge { left: String, right: String },

    /// Check whether an observed token satisfies a required one
    Check {
        #[arg(long)]
        required: String,

        #[arg(long)]
        observed: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Load and validate a configuration file
    Check {
        /// Path to configuration file
        #[arg(long, default_value = "./aeroroute.json")]
        config: PathBuf,
    },

    /// Print the default configuration
    Defaults,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
