//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Frame Verifier - quality verification of detector frame streams
#[derive(Parser, Debug)]
#[command(
    name = "frame-verifier",
    author,
    version,
    about = "Detector frame quality verification engine",
    long_about = "Verifies detector frame streams against configured quality limits.\n\n\
                  Reads frames from the configured sources, runs basic and statistical \n\
                  checks per data type, reports failures in real time and writes a \n\
                  final verification report."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "FRAME_VERIFIER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "FRAME_VERIFIER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Verify the configured sources
    Run(RunArgs),

    /// Validate configuration, limits and check selection without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "verifier.toml",
        env = "FRAME_VERIFIER_CONFIG"
    )]
    pub config: PathBuf,

    /// Run timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "FRAME_VERIFIER_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and inputs, then exit without verifying
    #[arg(long)]
    pub dry_run: bool,

    /// Capacity of the per-source acquisition and frame queues
    #[arg(long, default_value = "100", env = "FRAME_VERIFIER_BUFFER_SIZE")]
    pub buffer_size: usize,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "FRAME_VERIFIER_METRICS_PORT")]
    pub metrics_port: u16,

    /// Write the report to this path instead of `verification.report_path`
    #[arg(long, env = "FRAME_VERIFIER_REPORT")]
    pub report: Option<PathBuf>,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "verifier.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "verifier.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show detailed source information
    #[arg(long)]
    pub sources: bool,

    /// Show consumer configuration
    #[arg(long)]
    pub consumers: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}
