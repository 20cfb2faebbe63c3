// src/engine/core.rs

//! Core runtime state machine.
//!
//! The core consumes [`RuntimeEvent`]s and produces:
//! - an updated scheduler state
//! - a list of commands describing what the IO shell should do next
//!
//! It has no channels and no Tokio types. Staleness checks read the
//! filesystem through the [`FileSystem`] trait, so tests drive it with a
//! mock filesystem and an in-memory ledger.

use std::sync::Arc;

use crate::dag::{Plan, Scheduler};
use crate::engine::event_handlers::{
    CoreStep, handle_instance_completion, handle_run_start, handle_shutdown,
};
use crate::engine::report::RunReport;
use crate::engine::RuntimeEvent;
use crate::fs::FileSystem;
use crate::ledger::RunLedger;
use crate::staleness::StalenessChecker;

#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    checker: StalenessChecker,
    ledger: Arc<dyn RunLedger>,
}

impl CoreRuntime {
    pub fn new(
        plan: Arc<Plan>,
        fs: Arc<dyn FileSystem>,
        ledger: Arc<dyn RunLedger>,
        concurrency: usize,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(plan, concurrency),
            checker: StalenessChecker::new(fs),
            ledger,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn ledger(&self) -> &Arc<dyn RunLedger> {
        &self.ledger
    }

    /// Commands for the first ready instances.
    pub fn start(&mut self) -> CoreStep {
        handle_run_start(&mut self.scheduler, &self.checker, self.ledger.as_ref())
    }

    /// Handle a single runtime event.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::InstanceCompleted { index, outcome, .. } => handle_instance_completion(
                &mut self.scheduler,
                &self.checker,
                self.ledger.as_ref(),
                index,
                outcome,
            ),
            RuntimeEvent::ShutdownRequested => handle_shutdown(&mut self.scheduler),
        }
    }

    pub fn report(&self) -> RunReport {
        RunReport::from_scheduler(&self.scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{InputEntry, OneOrMany, TaskConfig};
    use crate::config::Params;
    use crate::dag::{GraphResolver, InstanceState, TaskRegistry};
    use crate::engine::event_handlers::CoreCommand;
    use crate::engine::{FailureCause, TaskOutcome};
    use crate::fs::mock::MockFileSystem;
    use crate::ledger::MemoryLedger;
    use crate::task::Task;

    fn registry() -> TaskRegistry {
        let mut reg = TaskRegistry::new();
        let trim = TaskConfig {
            input: OneOrMany::One(InputEntry::Pattern("*.fastq".into())),
            suffix: Some(".fastq".into()),
            output: OneOrMany::One("{basename}.trimmed".into()),
            cmd: Some("trim {input} > {output}".into()),
            ..TaskConfig::default()
        };
        let align = TaskConfig {
            input: OneOrMany::One(InputEntry::Task { task: "trim".into() }),
            suffix: Some(".trimmed".into()),
            output: OneOrMany::One("{basename}.bam".into()),
            cmd: Some("align {input} > {output}".into()),
            ..TaskConfig::default()
        };
        reg.register(Task::from_config("trim", &trim).unwrap()).unwrap();
        reg.register(Task::from_config("align", &align).unwrap()).unwrap();
        reg
    }

    fn core(fs: &MockFileSystem, ledger: Arc<MemoryLedger>) -> CoreRuntime {
        let reg = registry();
        let plan = GraphResolver::new(&reg, fs).plan(&["align"], &Params::new()).unwrap();
        CoreRuntime::new(Arc::new(plan), Arc::new(fs.clone()), ledger, 4)
    }

    fn dispatched(step: &CoreStep) -> Vec<String> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::DispatchInstances(v) => Some(v.iter().map(|s| s.id().to_string())),
                CoreCommand::RequestExit => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn failure_blocks_dependent_and_ends_run() {
        let fs = MockFileSystem::new();
        fs.add_file("s1.fastq", "ACGT");
        let ledger = Arc::new(MemoryLedger::new());
        let mut core = core(&fs, ledger.clone());

        let step = core.start();
        assert_eq!(dispatched(&step), vec!["trim[s1.trimmed]"]);

        let step = core.step(RuntimeEvent::InstanceCompleted {
            index: 0,
            id: "trim[s1.trimmed]".into(),
            outcome: TaskOutcome::Failed(FailureCause::Spawn("boom".into())),
        });
        assert!(!step.keep_running);
        assert_eq!(core.scheduler().state_by_id("align[s1.bam]"), Some(InstanceState::Blocked));
        assert!(!ledger.has_succeeded("trim[s1.trimmed]").unwrap());

        let report = core.report();
        assert_eq!(report.failed().len(), 1);
        assert_eq!(report.blocked().len(), 1);
    }

    #[test]
    fn fresh_outputs_are_never_dispatched() {
        let fs = MockFileSystem::new();
        fs.add_file("s1.fastq", "ACGT");
        fs.add_file("s1.trimmed", "ACG");
        fs.add_file("s1.bam", "bam");
        let mut core = core(&fs, Arc::new(MemoryLedger::new()));

        let step = core.start();
        assert!(dispatched(&step).is_empty());
        assert!(!step.keep_running);
        assert_eq!(core.report().exit_code(), 0);
    }

    #[test]
    fn rebuilt_upstream_forces_downstream_rerun() {
        let fs = MockFileSystem::new();
        fs.add_file("s1.fastq", "ACGT");
        let mut core = core(&fs, Arc::new(MemoryLedger::new()));

        core.start();
        fs.add_file("s1.trimmed", "ACG");
        fs.add_file("s1.bam", "bam");
        let step = core.step(RuntimeEvent::InstanceCompleted {
            index: 0,
            id: "trim[s1.trimmed]".into(),
            outcome: TaskOutcome::Success,
        });
        assert_eq!(dispatched(&step), vec!["align[s1.bam]"]);
    }

    #[test]
    fn shutdown_waits_for_running_instances() {
        let fs = MockFileSystem::new();
        fs.add_file("s1.fastq", "ACGT");
        let mut core = core(&fs, Arc::new(MemoryLedger::new()));
        core.start();

        let step = core.step(RuntimeEvent::ShutdownRequested);
        assert!(step.keep_running);

        fs.add_file("s1.trimmed", "ACG");
        let step = core.step(RuntimeEvent::InstanceCompleted {
            index: 0,
            id: "trim[s1.trimmed]".into(),
            outcome: TaskOutcome::Success,
        });
        assert!(dispatched(&step).is_empty());
        assert!(!step.keep_running);
        assert_eq!(core.report().exit_code(), crate::errors::EXIT_ABORTED);
    }
}
