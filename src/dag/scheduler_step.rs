// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::instance::InstanceId;
use crate::dag::task_info::ScheduledInstance;

/// Structured result of a single scheduler "step".
///
/// Useful for tests that want to manually step the scheduler and make
/// assertions about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Instances promoted to `Running` by this step.
    pub newly_scheduled: Vec<ScheduledInstance>,
    /// Instances newly marked `Blocked` by this step.
    pub newly_blocked: Vec<InstanceId>,
    /// Whether this step finished the run (nothing left running, and nothing
    /// left to promote).
    pub run_just_finished: bool,
}
