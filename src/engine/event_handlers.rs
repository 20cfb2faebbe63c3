// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::dag::{InstanceState, ScheduledInstance, Scheduler, SchedulerStep};
use crate::engine::TaskOutcome;
use crate::ledger::RunLedger;
use crate::staleness::{Staleness, StalenessChecker};

/// Command produced by the core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these instances to the executor.
    DispatchInstances(Vec<ScheduledInstance>),
    /// Every instance is terminal (or the run was aborted and drained).
    RequestExit,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Seed the run with the instances that have no pending upstreams.
pub fn handle_run_start(
    scheduler: &mut Scheduler,
    checker: &StalenessChecker,
    ledger: &dyn RunLedger,
) -> CoreStep {
    let step = scheduler.step_start();
    finish(scheduler, checker, ledger, step)
}

/// Handle a finished work unit.
///
/// The ledger is written before the scheduler state changes, so a crash
/// after this point never loses a success. Ledger write errors only warn;
/// the next invocation then simply reruns the instance.
pub fn handle_instance_completion(
    scheduler: &mut Scheduler,
    checker: &StalenessChecker,
    ledger: &dyn RunLedger,
    index: usize,
    outcome: TaskOutcome,
) -> CoreStep {
    if scheduler.state_of(index) == Some(InstanceState::Running) {
        if let Some(instance) = scheduler.plan().instance(index) {
            let written = match &outcome {
                TaskOutcome::Success => ledger.mark_success(instance),
                TaskOutcome::Failed(_) => ledger.mark_failed(instance),
            };
            if let Err(err) = written {
                warn!(instance = %instance.id, error = %err, "failed to write ledger record");
            }
        }
    }

    let step = scheduler.step_completion(index, outcome);
    for id in &step.newly_blocked {
        info!(instance = %id, "instance blocked by failed upstream");
    }
    finish(scheduler, checker, ledger, step)
}

/// Stop dispatching; wait for running instances.
pub fn handle_shutdown(scheduler: &mut Scheduler) -> CoreStep {
    scheduler.abort();
    let done = scheduler.is_finished();
    CoreStep {
        commands: if done { vec![CoreCommand::RequestExit] } else { Vec::new() },
        keep_running: !done,
    }
}

fn finish(
    scheduler: &mut Scheduler,
    checker: &StalenessChecker,
    ledger: &dyn RunLedger,
    step: SchedulerStep,
) -> CoreStep {
    let mut commands = Vec::new();

    let to_run = filter_up_to_date(scheduler, checker, ledger, step.newly_scheduled);
    if !to_run.is_empty() {
        commands.push(CoreCommand::DispatchInstances(to_run));
    }

    let keep_running = !scheduler.is_finished();
    if !keep_running {
        commands.push(CoreCommand::RequestExit);
    }

    CoreStep {
        commands,
        keep_running,
    }
}

/// Drop ready instances whose outputs are fresh, marking them `UP_TO_DATE`.
///
/// Marking one may make its dependents ready, so this loops until only
/// stale instances remain.
fn filter_up_to_date(
    scheduler: &mut Scheduler,
    checker: &StalenessChecker,
    ledger: &dyn RunLedger,
    ready: Vec<ScheduledInstance>,
) -> Vec<ScheduledInstance> {
    let mut queue: VecDeque<ScheduledInstance> = ready.into();
    let mut to_run = Vec::new();

    while let Some(sched) = queue.pop_front() {
        let idx = sched.index;
        let rebuilt = scheduler
            .rebuilt_upstream(idx)
            .and_then(|up| scheduler.plan().instance(up))
            .map(|up| up.id.clone());

        let verdict = {
            let plan = scheduler.plan();
            let upstream = plan.upstream_outputs(idx);
            checker.evaluate(&sched.instance, &sched.task, &upstream, ledger, rebuilt.as_deref())
        };

        match verdict {
            Ok(Staleness::UpToDate) => {
                info!(instance = %sched.id(), "up to date; skipping");
                let step = scheduler.step_up_to_date(idx);
                queue.extend(step.newly_scheduled);
            }
            Ok(Staleness::Stale(reason)) => {
                debug!(instance = %sched.id(), %reason, "instance is stale");
                to_run.push(sched);
            }
            Err(err) => {
                warn!(instance = %sched.id(), error = %err, "staleness check failed; running instance");
                to_run.push(sched);
            }
        }
    }

    to_run
}
