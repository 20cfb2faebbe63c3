// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - the instance scheduler
//! - staleness checks and the run ledger (consulted as instances become ready)
//! - the main runtime event loop that reacts to:
//!   - instance completion events
//!   - shutdown signals (Ctrl-C)
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]; [`report`] summarizes a finished run.

use std::fmt;
use std::path::PathBuf;

use crate::dag::InstanceId;

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// Why a work unit failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The command exited unsuccessfully; `code` is `None` when killed by a
    /// signal.
    ExitStatus { code: Option<i32>, stderr_tail: String },
    /// The work unit succeeded but did not produce these outputs.
    MissingOutputs(Vec<PathBuf>),
    /// An in-process function returned an error or panicked.
    Function(String),
    /// The work unit could not be started (spawn, submit, mkdir, staging).
    Spawn(String),
    /// A cluster job disappeared from the queue without reporting an exit.
    JobVanished(String),
    /// A cluster job did not finish within `[cluster].job_timeout_secs`.
    JobTimedOut { job: String, secs: u64 },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::ExitStatus { code, stderr_tail } => {
                match code {
                    Some(c) => write!(f, "exit code {c}")?,
                    None => f.write_str("terminated by signal")?,
                }
                if !stderr_tail.is_empty() {
                    write!(f, ": {}", stderr_tail.trim_end())?;
                }
                Ok(())
            }
            FailureCause::MissingOutputs(paths) => {
                let shown: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                write!(f, "missing outputs after success: {}", shown.join(", "))
            }
            FailureCause::Function(msg) => write!(f, "function failed: {msg}"),
            FailureCause::Spawn(msg) => write!(f, "could not start: {msg}"),
            FailureCause::JobVanished(job) => write!(f, "cluster job {job} vanished"),
            FailureCause::JobTimedOut { job, secs } => {
                write!(f, "cluster job {job} gave no exit status within {secs}s")
            }
        }
    }
}

/// Outcome of a dispatched work unit for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed(FailureCause),
}

/// Events flowing into the runtime from executors and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A dispatched work unit finished.
    InstanceCompleted {
        index: usize,
        id: InstanceId,
        outcome: TaskOutcome,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Capacity of the runtime event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub mod core;
pub mod event_handlers;
pub mod report;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use report::{InstanceReport, RunReport};
pub use runtime::Runtime;
