// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::path::PathBuf;

use thiserror::Error;

/// Exit code: every task instance succeeded or was up to date.
pub const EXIT_OK: i32 = 0;
/// Exit code: at least one instance failed or was blocked.
pub const EXIT_TASKS_FAILED: i32 = 1;
/// Exit code: the pipeline graph or its configuration is invalid.
pub const EXIT_INVALID_GRAPH: i32 = 2;
/// Exit code: any other error (IO, process spawning, ledger).
pub const EXIT_OTHER: i32 = 3;
/// Exit code: the run was aborted (Ctrl-C).
pub const EXIT_ABORTED: i32 = 130;

#[derive(Error, Debug)]
pub enum PipedagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("Task not found: {0}")]
    UnknownTask(String),

    #[error("Cyclic dependency between tasks: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Output {path:?} is claimed by both '{first}' and '{second}'")]
    OutputCollision {
        path: PathBuf,
        first: String,
        second: String,
    },

    #[error("Target task '{0}' resolved to zero instances (no matching inputs)")]
    MissingUpstreamArtifact(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("Invalid regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("Design table error: {0}")]
    Design(#[from] csv::Error),

    #[error("Ledger serialization error: {0}")]
    Ledger(#[from] serde_json::Error),

    #[error("{failed} task instance(s) failed, {blocked} blocked")]
    WorkUnitFailure { failed: usize, blocked: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipedagError {
    /// Process exit code for this error.
    ///
    /// Graph-construction errors are reported before any work unit runs and
    /// are distinguished from execution-time failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipedagError::ConfigError(_)
            | PipedagError::TomlError(_)
            | PipedagError::DuplicateTask(_)
            | PipedagError::UnknownTask(_)
            | PipedagError::CyclicDependency(_)
            | PipedagError::OutputCollision { .. }
            | PipedagError::MissingUpstreamArtifact(_)
            | PipedagError::Template(_)
            | PipedagError::Glob(_)
            | PipedagError::Regex(_) => EXIT_INVALID_GRAPH,
            PipedagError::WorkUnitFailure { .. } => EXIT_TASKS_FAILED,
            PipedagError::IoError(_)
            | PipedagError::Design(_)
            | PipedagError::Ledger(_)
            | PipedagError::Other(_) => EXIT_OTHER,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipedagError>;
