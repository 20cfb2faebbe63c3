// src/dag/task_info.rs

//! Per-instance run state and the unit handed to executors.

use std::fmt;
use std::sync::Arc;

use crate::config::Params;
use crate::dag::instance::TaskInstance;
use crate::task::Task;

/// Per-run state of an instance.
///
/// `Pending -> {UpToDate | Running -> {Succeeded | Failed}}`, and
/// `Pending -> Blocked` when an upstream fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    UpToDate,
    Succeeded,
    Failed,
    Blocked,
}

impl InstanceState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, InstanceState::Pending | InstanceState::Running)
    }

    /// `UpToDate` or `Succeeded`.
    pub fn is_success(self) -> bool {
        matches!(self, InstanceState::UpToDate | InstanceState::Succeeded)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Pending => "PENDING",
            InstanceState::Running => "RUNNING",
            InstanceState::UpToDate => "UP_TO_DATE",
            InstanceState::Succeeded => "SUCCEEDED",
            InstanceState::Failed => "FAILED",
            InstanceState::Blocked => "BLOCKED",
        };
        f.write_str(s)
    }
}

/// Mutable per-run bookkeeping for one instance.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub state: InstanceState,
    /// Failure or blocking cause, for the end-of-run report.
    pub cause: Option<String>,
}

impl Default for InstanceInfo {
    fn default() -> Self {
        Self {
            state: InstanceState::Pending,
            cause: None,
        }
    }
}

/// An instance the scheduler wants run now.
#[derive(Debug, Clone)]
pub struct ScheduledInstance {
    /// Position in the plan.
    pub index: usize,
    pub instance: TaskInstance,
    pub task: Arc<Task>,
    pub params: Arc<Params>,
}

impl ScheduledInstance {
    pub fn id(&self) -> &str {
        &self.instance.id
    }
}
