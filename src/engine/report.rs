// src/engine/report.rs

//! End-of-run summary.

use std::fmt;

use crate::dag::{InstanceId, InstanceState, Scheduler};
use crate::engine::TaskName;
use crate::errors::{EXIT_ABORTED, EXIT_OK, EXIT_TASKS_FAILED, PipedagError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceReport {
    pub id: InstanceId,
    pub task: TaskName,
    pub state: InstanceState,
    pub cause: Option<String>,
}

/// Final state of every planned instance, in plan order.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub instances: Vec<InstanceReport>,
    pub aborted: bool,
}

impl RunReport {
    pub fn from_scheduler(scheduler: &Scheduler) -> Self {
        let instances = scheduler
            .plan()
            .instances()
            .iter()
            .enumerate()
            .map(|(idx, inst)| InstanceReport {
                id: inst.id.clone(),
                task: inst.task.clone(),
                state: scheduler.state_of(idx).unwrap_or(InstanceState::Pending),
                cause: scheduler.cause_of(idx).map(str::to_string),
            })
            .collect();
        Self {
            instances,
            aborted: scheduler.is_aborted(),
        }
    }

    fn with_state(&self, state: InstanceState) -> Vec<&InstanceReport> {
        self.instances.iter().filter(|r| r.state == state).collect()
    }

    pub fn succeeded(&self) -> Vec<&InstanceReport> {
        self.with_state(InstanceState::Succeeded)
    }

    pub fn up_to_date(&self) -> Vec<&InstanceReport> {
        self.with_state(InstanceState::UpToDate)
    }

    pub fn failed(&self) -> Vec<&InstanceReport> {
        self.with_state(InstanceState::Failed)
    }

    pub fn blocked(&self) -> Vec<&InstanceReport> {
        self.with_state(InstanceState::Blocked)
    }

    /// Instances never started because the run was aborted.
    pub fn not_run(&self) -> Vec<&InstanceReport> {
        self.instances
            .iter()
            .filter(|r| !r.state.is_terminal())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        !self.aborted && self.instances.iter().all(|r| r.state.is_success())
    }

    pub fn exit_code(&self) -> i32 {
        if self.aborted {
            EXIT_ABORTED
        } else if self.is_success() {
            EXIT_OK
        } else {
            EXIT_TASKS_FAILED
        }
    }

    /// `WorkUnitFailure` when anything failed or was blocked.
    pub fn into_result(self) -> Result<Self, PipedagError> {
        let (failed, blocked) = (self.failed().len(), self.blocked().len());
        if failed + blocked > 0 {
            return Err(PipedagError::WorkUnitFailure { failed, blocked });
        }
        Ok(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} instance(s): {} succeeded, {} up to date, {} failed, {} blocked",
            self.instances.len(),
            self.succeeded().len(),
            self.up_to_date().len(),
            self.failed().len(),
            self.blocked().len(),
        )?;
        for r in self.failed().into_iter().chain(self.blocked()) {
            write!(f, "  {:<10} {}", r.state.to_string(), r.id)?;
            if let Some(cause) = &r.cause {
                write!(f, ": {cause}")?;
            }
            writeln!(f)?;
        }
        if self.aborted {
            let not_run = self.not_run();
            writeln!(f, "aborted; {} instance(s) not run", not_run.len())?;
            for r in not_run {
                writeln!(f, "  not run    {}", r.id)?;
            }
        }
        Ok(())
    }
}
