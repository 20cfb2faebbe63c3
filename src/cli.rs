// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::{BackendKind, LedgerStorage};

/// Command-line arguments for `pipedag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pipedag",
    version,
    about = "Plan and run file-based pipelines of external tools, resuming where they stopped.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline file (TOML).
    ///
    /// Default: `Pipeline.toml` in the current working directory. Task paths
    /// are relative to the directory containing this file.
    #[arg(long, global = true, value_name = "PATH", default_value = "Pipeline.toml")]
    pub pipeline: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PIPEDAG_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Override a `[params]` entry, e.g. `--param homer=false`.
    #[arg(long = "param", global = true, value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Plan and execute the named targets.
    Run {
        /// Target tasks; defaults to `[pipeline].default_target`.
        targets: Vec<String>,

        /// Maximum number of instances running at once.
        #[arg(short = 'j', long, value_name = "N")]
        concurrency: Option<usize>,

        /// Execution backend (`local` or `cluster`).
        #[arg(long, value_name = "BACKEND")]
        backend: Option<BackendKind>,

        /// Ledger storage (`file` or `memory`).
        #[arg(long, value_name = "MODE")]
        ledger: Option<LedgerStorage>,
    },

    /// Print the resolved execution order without running anything.
    ShowPlan {
        /// Target tasks; defaults to `[pipeline].default_target`.
        targets: Vec<String>,
    },

    /// Print a default pipeline skeleton to stdout.
    Config,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
